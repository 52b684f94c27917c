use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::LINE_DELIMITER;

/// Discrete drive intent. Only one axis drives the boat at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandCode {
    Neutral,
    Forward,
    Reverse,
    Left,
    Right,
}

impl CommandCode {
    pub const ALL: [CommandCode; 5] = [
        CommandCode::Neutral,
        CommandCode::Forward,
        CommandCode::Reverse,
        CommandCode::Left,
        CommandCode::Right,
    ];
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlphabetError {
    #[error("token for {0:?} is empty")]
    Empty(CommandCode),
    #[error("token {token:?} for {code:?} contains a reserved character")]
    Reserved { code: CommandCode, token: String },
    #[error("token {token:?} is shared by {a:?} and {b:?}")]
    Duplicate { token: String, a: CommandCode, b: CommandCode },
}

/// Wire tokens for each [`CommandCode`]. Must stay a bijection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandAlphabet {
    pub neutral: String,
    pub forward: String,
    pub reverse: String,
    pub left: String,
    pub right: String,
}

impl Default for CommandAlphabet {
    fn default() -> Self {
        Self {
            neutral: "0".into(),
            forward: "2".into(),
            reverse: "1".into(),
            left: "3".into(),
            right: "4".into(),
        }
    }
}

impl CommandAlphabet {
    pub fn token(&self, code: CommandCode) -> &str {
        match code {
            CommandCode::Neutral => &self.neutral,
            CommandCode::Forward => &self.forward,
            CommandCode::Reverse => &self.reverse,
            CommandCode::Left => &self.left,
            CommandCode::Right => &self.right,
        }
    }

    pub fn decode(&self, token: &str) -> Option<CommandCode> {
        CommandCode::ALL.into_iter().find(|c| self.token(*c) == token)
    }

    pub fn validate(&self) -> Result<(), AlphabetError> {
        for code in CommandCode::ALL {
            let tok = self.token(code);
            if tok.is_empty() {
                return Err(AlphabetError::Empty(code));
            }
            if tok.chars().any(|c| c == ',' || c == ':' || c.is_whitespace() || c.is_control()) {
                return Err(AlphabetError::Reserved { code, token: tok.to_string() });
            }
        }
        for (i, a) in CommandCode::ALL.iter().enumerate() {
            for b in &CommandCode::ALL[i + 1..] {
                if self.token(*a) == self.token(*b) {
                    return Err(AlphabetError::Duplicate {
                        token: self.token(*a).to_string(),
                        a: *a,
                        b: *b,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Frame style is fixed for a whole session; the two are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStyle {
    /// One alphabet token per command.
    #[default]
    Discrete,
    /// `CTRL,<throttle>,<steer>` in integer percent.
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveFrame {
    Code(CommandCode),
    Ctrl { throttle: i8, steer: i8 },
}

impl DriveFrame {
    pub fn encode(&self, alphabet: &CommandAlphabet) -> String {
        match self {
            DriveFrame::Code(code) => format!("{}{}", alphabet.token(*code), LINE_DELIMITER),
            DriveFrame::Ctrl { throttle, steer } => {
                format!("CTRL,{},{}{}", throttle, steer, LINE_DELIMITER)
            }
        }
    }

    /// Vehicle-side decode, used by the simulator.
    pub fn decode(line: &str, alphabet: &CommandAlphabet) -> Option<Self> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("CTRL,") {
            let (t, s) = rest.split_once(',')?;
            let throttle: i8 = t.trim().parse().ok()?;
            let steer: i8 = s.trim().parse().ok()?;
            if !(-100..=100).contains(&throttle) || !(-100..=100).contains(&steer) {
                return None;
            }
            return Some(DriveFrame::Ctrl { throttle, steer });
        }
        alphabet.decode(line).map(DriveFrame::Code)
    }
}

/// Map a normalized axis value onto the `-100..=100` CTRL range.
pub fn percent(v: f64) -> i8 {
    (v.clamp(-1.0, 1.0) * 100.0).round() as i8
}

/// Request/response and configuration commands. Not time-critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxCommand {
    Ping,
    Status,
    /// Vehicle-side autonomous return, independent of the app navigator.
    Return,
    Calibrate,
    SpeedMax(u8),
}

impl AuxCommand {
    pub fn encode(&self) -> String {
        let body = match self {
            AuxCommand::Ping => "PING".to_string(),
            AuxCommand::Status => "STATUS".to_string(),
            AuxCommand::Return => "RETURN".to_string(),
            AuxCommand::Calibrate => "CALIBRATE".to_string(),
            AuxCommand::SpeedMax(n) => format!("SPEED,MAX,{}", n),
        };
        format!("{}{}", body, LINE_DELIMITER)
    }

    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "PING" => Some(AuxCommand::Ping),
            "STATUS" => Some(AuxCommand::Status),
            "RETURN" => Some(AuxCommand::Return),
            "CALIBRATE" => Some(AuxCommand::Calibrate),
            other => other
                .strip_prefix("SPEED,MAX,")
                .and_then(|n| n.trim().parse().ok())
                .map(AuxCommand::SpeedMax),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_alphabet_matches_reference_tokens() {
        let a = CommandAlphabet::default();
        assert_eq!(a.token(CommandCode::Reverse), "1");
        assert_eq!(a.token(CommandCode::Forward), "2");
        assert_eq!(a.token(CommandCode::Left), "3");
        assert_eq!(a.token(CommandCode::Right), "4");
        assert_eq!(a.token(CommandCode::Neutral), "0");
        assert!(a.validate().is_ok());
    }

    #[test]
    fn alphabet_is_a_bijection() {
        let a = CommandAlphabet::default();
        for code in CommandCode::ALL {
            assert_eq!(a.decode(a.token(code)), Some(code));
        }
        assert_eq!(a.decode("9"), None);
    }

    #[test]
    fn alphabet_rejects_duplicates_and_reserved() {
        let mut a = CommandAlphabet::default();
        a.left = "2".into();
        assert!(matches!(a.validate(), Err(AlphabetError::Duplicate { .. })));

        let mut a = CommandAlphabet::default();
        a.right = "R,".into();
        assert!(matches!(a.validate(), Err(AlphabetError::Reserved { .. })));

        let mut a = CommandAlphabet::default();
        a.neutral.clear();
        assert_eq!(a.validate(), Err(AlphabetError::Empty(CommandCode::Neutral)));
    }

    #[test]
    fn word_alphabet_from_rc_firmware() {
        let a = CommandAlphabet {
            neutral: "STOP".into(),
            forward: "FORWARD".into(),
            reverse: "BACKWARD".into(),
            left: "LEFT".into(),
            right: "RIGHT".into(),
        };
        assert!(a.validate().is_ok());
        assert_eq!(DriveFrame::Code(CommandCode::Reverse).encode(&a), "BACKWARD\n");
    }

    #[test]
    fn ctrl_frame_encoding() {
        let a = CommandAlphabet::default();
        let f = DriveFrame::Ctrl { throttle: percent(0.9), steer: percent(-0.333) };
        assert_eq!(f.encode(&a), "CTRL,90,-33\n");
        assert_eq!(DriveFrame::decode("CTRL,90,-33", &a), Some(f));
        assert_eq!(DriveFrame::decode("CTRL,101,0", &a), None);
        assert_eq!(DriveFrame::decode("CTRL,5", &a), None);
    }

    #[test]
    fn percent_clamps() {
        assert_eq!(percent(3.0), 100);
        assert_eq!(percent(-7.5), -100);
        assert_eq!(percent(0.0), 0);
    }

    #[test]
    fn aux_commands() {
        assert_eq!(AuxCommand::Ping.encode(), "PING\n");
        assert_eq!(AuxCommand::SpeedMax(60).encode(), "SPEED,MAX,60\n");
        assert_eq!(AuxCommand::parse("SPEED,MAX,60"), Some(AuxCommand::SpeedMax(60)));
        assert_eq!(AuxCommand::parse("RETURN\n"), Some(AuxCommand::Return));
        assert_eq!(AuxCommand::parse("SPEED,MAX,x"), None);
    }
}
