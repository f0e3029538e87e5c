use std::fmt;

use crate::error::{PlacequeryError, Result};

/// Separates the provider cursor from the plan index. Provider cursors are
/// base64-ish and never contain it.
pub const SEPARATOR: &str = "@#$";

/// Where a "full data" walk should continue: the provider's own pagination
/// cursor, if any, and the plan row to resume at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumeToken {
    cursor: Option<String>,
    plan_index: usize,
}
impl ResumeToken {
    pub fn new(cursor: Option<String>, plan_index: usize) -> Self {
        Self {
            cursor: cursor.filter(|c| !c.is_empty()),
            plan_index,
        }
    }
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }
    pub fn plan_index(&self) -> usize {
        self.plan_index
    }
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            self.cursor.as_deref().unwrap_or(""),
            SEPARATOR,
            self.plan_index
        )
    }
    /// An absent or empty token is the start of the plan. A token without the
    /// separator is a bare provider cursor at index 0.
    pub fn decode(token: Option<&str>) -> Result<Self> {
        let token = match token.map(str::trim) {
            None | Some("") => return Ok(Self::default()),
            Some(token) => token,
        };
        match token.rsplit_once(SEPARATOR) {
            None => Ok(Self::new(Some(token.to_string()), 0)),
            Some((cursor, index)) => {
                let plan_index = index
                    .parse::<usize>()
                    .map_err(|_| PlacequeryError::Token(format!("bad plan index '{}'", index)))?;
                Ok(Self::new(Some(cursor.to_string()), plan_index))
            }
        }
    }
}
impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
