//! Per-side score tallies and winner determination.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest score a single turn can earn.
pub const MAX_TURN_SCORE: u32 = 15;

/// One of the two debating sides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pro,
    Con,
}

impl Side {
    pub fn label(&self) -> &'static str {
        match self {
            Side::Pro => "Pro",
            Side::Con => "Con",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The referee's assessment of a single turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub side: Side,
    /// Always within `0..=MAX_TURN_SCORE`.
    pub score: u32,
    pub reasoning: String,
}

/// Outcome of a finished debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    Pro,
    Con,
    Tie,
}

impl Winner {
    pub fn label(&self) -> &'static str {
        match self {
            Winner::Pro => "Pro",
            Winner::Con => "Con",
            Winner::Tie => "Tie",
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Running totals per side. Only ever incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBoard {
    pro: u32,
    con: u32,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: &ScoreEntry) {
        let points = entry.score.min(MAX_TURN_SCORE);
        match entry.side {
            Side::Pro => self.pro = self.pro.saturating_add(points),
            Side::Con => self.con = self.con.saturating_add(points),
        }
    }

    pub fn pro(&self) -> u32 {
        self.pro
    }

    pub fn con(&self) -> u32 {
        self.con
    }

    pub fn total(&self, side: Side) -> u32 {
        match side {
            Side::Pro => self.pro,
            Side::Con => self.con,
        }
    }

    pub fn winner(&self) -> Winner {
        match self.pro.cmp(&self.con) {
            std::cmp::Ordering::Greater => Winner::Pro,
            std::cmp::Ordering::Less => Winner::Con,
            std::cmp::Ordering::Equal => Winner::Tie,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(pro: u32, con: u32) -> ScoreBoard {
        ScoreBoard { pro, con }
    }

    #[test]
    fn test_winner_determination() {
        assert_eq!(board(30, 25).winner(), Winner::Pro);
        assert_eq!(board(20, 20).winner(), Winner::Tie);
        assert_eq!(board(10, 40).winner(), Winner::Con);
    }

    #[test]
    fn test_record_accumulates_per_side() {
        let mut scores = ScoreBoard::new();
        scores.record(&ScoreEntry {
            side: Side::Pro,
            score: 12,
            reasoning: "solid".into(),
        });
        scores.record(&ScoreEntry {
            side: Side::Con,
            score: 9,
            reasoning: "thin".into(),
        });
        scores.record(&ScoreEntry {
            side: Side::Pro,
            score: 7,
            reasoning: "repetitive".into(),
        });
        assert_eq!(scores.pro(), 19);
        assert_eq!(scores.con(), 9);
        assert_eq!(scores.total(Side::Con), 9);
    }

    #[test]
    fn test_record_caps_turn_score() {
        let mut scores = ScoreBoard::new();
        scores.record(&ScoreEntry {
            side: Side::Con,
            score: 99,
            reasoning: String::new(),
        });
        assert_eq!(scores.con(), MAX_TURN_SCORE);
    }
}
