use std::fmt;

use crate::*;

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.name.is_empty() {
            writeln!(f, "[{}]", self.name)?;
        }
        for (key, value) in self.iter() {
            writeln!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;

        // the unnamed section has no header, so it must come first
        if let Some(top) = self.section("") {
            if !top.is_empty() {
                write!(f, "{}", top)?;
                first = false;
            }
        }

        for section in self.sections().filter(|s| !s.name.is_empty()) {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{}", section)?;
            first = false;
        }
        Ok(())
    }
}
