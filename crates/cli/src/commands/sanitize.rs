//! `stridechat sanitize`: Show the redacted form of a text.

use std::path::Path;
use stridechat_security::PhiSanitizer;

use super::{CmdResult, load_config};

pub fn run(config_path: Option<&Path>, text: &str) -> CmdResult {
    let config = load_config(config_path)?;
    let sanitizer = PhiSanitizer::new(&config.sanitizer)?;

    match sanitizer.sanitize(text) {
        Ok(result) => {
            println!("{}", result.sanitized_text);
            if result.had_phi {
                eprintln!();
                for replacement in &result.replacements {
                    eprintln!("  {:<10} {}", replacement.category, replacement.count);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("  Blocked ({:?} policy): {e}", sanitizer.policy());
            Err(e.into())
        }
    }
}
