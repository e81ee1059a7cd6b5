//! Number → colors and size.
//!
//! Fixed game rules: 0 is Red+Violet, 5 is Green+Violet, odd numbers are
//! Green, even numbers are Red. Below 5 is Small, otherwise Big.

use serde::{Deserialize, Serialize};

use crate::types::{Color, Digit, Size};

/// Derived attributes of a draw number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub colors: Vec<Color>,
    pub size: Size,
}

pub fn classify(n: Digit) -> Classification {
    Classification {
        colors: colors(n).to_vec(),
        size: size(n),
    }
}

pub fn colors(n: Digit) -> &'static [Color] {
    match n.value() {
        0 => &[Color::Red, Color::Violet],
        5 => &[Color::Green, Color::Violet],
        1 | 3 | 7 | 9 => &[Color::Green],
        _ => &[Color::Red],
    }
}

pub fn size(n: Digit) -> Size {
    if n.value() < 5 {
        Size::Small
    } else {
        Size::Big
    }
}
