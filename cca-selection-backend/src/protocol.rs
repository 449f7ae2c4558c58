//! Text protocol spoken over the real-time connection.
//!
//! Every frame carries exactly one message made of space separated tokens.
//! Clients send `C <course>` to choose and `N <course>` to unchoose a course.
//! The server acknowledges with `Y <course>` / `N <course>`, rejects with
//! `R <course> <reason>`, reports unexpected failures with `E :<message>` and
//! broadcasts `START` / `STOP` when the admission phase changes.

use core::fmt::{self, Display};

use crate::courses::CourseId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    Choose(CourseId),
    Unchoose(CourseId),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("verb {verb} expects {expected} argument(s), got {got}")]
    BadArgumentCount {
        verb: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid course id {0:?}")]
    InvalidCourseId(String),
    #[error("binary frames are not supported")]
    Binary,
}

impl ClientMessage {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut tokens = line.split_ascii_whitespace();
        let verb = tokens.next().ok_or(ProtocolError::Empty)?;
        let arguments: Vec<&str> = tokens.collect();
        let (verb, constructor): (&'static str, fn(CourseId) -> Self) = match verb {
            "C" => ("C", Self::Choose),
            "N" => ("N", Self::Unchoose),
            other => return Err(ProtocolError::UnknownVerb(other.to_owned())),
        };
        let [course] = arguments.as_slice() else {
            return Err(ProtocolError::BadArgumentCount {
                verb,
                expected: 1,
                got: arguments.len(),
            });
        };
        course
            .parse()
            .map(constructor)
            .map_err(|_| ProtocolError::InvalidCourseId((*course).to_owned()))
    }

    #[must_use]
    pub const fn course(self) -> CourseId {
        match self {
            Self::Choose(course) | Self::Unchoose(course) => course,
        }
    }
}

/// Why a choose or unchoose request was turned down. The connection stays open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    Full,
    Closed,
    Group,
    Ineligible,
    NotFound,
}

impl RejectReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Closed => "CLOSED",
            Self::Group => "GROUP",
            Self::Ineligible => "INELIGIBLE",
            Self::NotFound => "NOTFOUND",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    Chosen(CourseId),
    Unchosen(CourseId),
    Rejected(CourseId, RejectReason),
    Failure(String),
    Start,
    Stop,
}

impl Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chosen(course) => write!(f, "Y {course}"),
            Self::Unchosen(course) => write!(f, "N {course}"),
            Self::Rejected(course, reason) => write!(f, "R {course} {}", reason.as_str()),
            Self::Failure(message) => write!(f, "E :{message}"),
            Self::Start => f.write_str("START"),
            Self::Stop => f.write_str("STOP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbs() {
        assert_eq!(
            ClientMessage::parse("C 12"),
            Ok(ClientMessage::Choose(CourseId(12)))
        );
        assert_eq!(
            ClientMessage::parse("N  7\n"),
            Ok(ClientMessage::Unchoose(CourseId(7)))
        );
    }

    #[test]
    fn rejects_malformed_messages() {
        assert_eq!(ClientMessage::parse("   "), Err(ProtocolError::Empty));
        assert_eq!(
            ClientMessage::parse("X 1"),
            Err(ProtocolError::UnknownVerb("X".to_owned()))
        );
        assert_eq!(
            ClientMessage::parse("C"),
            Err(ProtocolError::BadArgumentCount {
                verb: "C",
                expected: 1,
                got: 0
            })
        );
        assert_eq!(
            ClientMessage::parse("N 1 2"),
            Err(ProtocolError::BadArgumentCount {
                verb: "N",
                expected: 1,
                got: 2
            })
        );
        assert_eq!(
            ClientMessage::parse("C abc"),
            Err(ProtocolError::InvalidCourseId("abc".to_owned()))
        );
    }

    #[test]
    fn formats_server_messages() {
        assert_eq!(ServerMessage::Chosen(CourseId(3)).to_string(), "Y 3");
        assert_eq!(ServerMessage::Unchosen(CourseId(3)).to_string(), "N 3");
        assert_eq!(
            ServerMessage::Rejected(CourseId(3), RejectReason::Full).to_string(),
            "R 3 FULL"
        );
        assert_eq!(
            ServerMessage::Failure("database unavailable".to_owned()).to_string(),
            "E :database unavailable"
        );
        assert_eq!(ServerMessage::Start.to_string(), "START");
        assert_eq!(ServerMessage::Stop.to_string(), "STOP");
    }
}
