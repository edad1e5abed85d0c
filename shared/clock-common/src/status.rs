use serde::{Deserialize, Serialize};
use std::fmt;

pub const RET_OK: i32 = 0;
pub const RET_ERR: i32 = 1;
pub const RET_MISSING_CALLBACK: i32 = 2;

/// Result code attached to every completion and synchronous return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Status {
    Ok = RET_OK,
    Err = RET_ERR,
    MissingCallback = RET_MISSING_CALLBACK,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            RET_OK => Some(Status::Ok),
            RET_ERR => Some(Status::Err),
            RET_MISSING_CALLBACK => Some(Status::MissingCallback),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "ok",
            Status::Err => "err",
            Status::MissingCallback => "missing_callback",
        };
        f.write_str(s)
    }
}
