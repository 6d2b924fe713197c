//! Language identification for translation routing and output validation.
//!
//! A full language-ID model is overkill here: the pipeline only routes
//! between Chinese and English, and the CJK codepoint ratio separates those
//! two reliably even on markdown full of code fences and tables. The 30 %
//! threshold tolerates English technical terms embedded in Chinese prose.

use std::fmt;
use std::str::FromStr;

/// Languages the translation pipeline routes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    Zh,
    En,
}

impl Lang {
    /// Short code used in file and directory names (`mybook_zh/`).
    pub fn code(self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::En => "en",
        }
    }

    /// Human name used in model instructions.
    pub fn name(self) -> &'static str {
        match self {
            Lang::Zh => "Chinese",
            Lang::En => "English",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zh" | "chinese" => Ok(Lang::Zh),
            "en" | "english" => Ok(Lang::En),
            other => Err(format!("unsupported language: '{other}' (expected zh or en)")),
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}')
}

/// Detect the dominant language of `content`.
///
/// Counts CJK ideographs against all letters; a ratio above 0.3 is Chinese.
/// Empty or letter-free content defaults to English.
pub fn detect_language(content: &str) -> Lang {
    let mut cjk = 0usize;
    let mut letters = 0usize;

    for c in content.chars() {
        if is_cjk(c) {
            cjk += 1;
            letters += 1;
        } else if c.is_ascii_alphabetic() {
            letters += 1;
        }
    }

    if letters == 0 {
        return Lang::En;
    }
    if (cjk as f64) / (letters as f64) > 0.3 {
        Lang::Zh
    } else {
        Lang::En
    }
}
