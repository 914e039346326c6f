//! Recognition of the package and public type declared by generated source.
//!
//! Generated programs declare their package as the first top-level
//! `pub mod <package> {` block and their public type as the first
//! `pub struct <Class>` that follows it:
//!
//! ```text
//! pub mod demo {
//!     pub struct Model_1 { /* ... */ }
//! }
//! fn main() { /* ... */ }
//! ```
//!
//! This is a line scanner, not a parser. It only has to recognise what the
//! generator emits and reject output that lacks the declarations.

use thiserror::Error;

/// Package and type name recovered from generated source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Name of the package module.
    pub package: String,
    /// Name of the public type inside the package.
    pub class_name: String,
}

/// Generated source did not carry a usable package/type declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedSource {
    /// No `pub mod <name> {` block was found.
    #[error("no package declaration (`pub mod <name> {{`) found")]
    MissingPackage,
    /// The package block declares no `pub struct`.
    #[error("no public type declared in package `{0}`")]
    MissingClass(String),
    /// A declared name is not a valid identifier.
    #[error("`{0}` is not a valid identifier")]
    InvalidIdentifier(String),
    /// The declarations found differ from the names the generator reported.
    #[error("source declares `{found}` but `{declared}` was expected")]
    Mismatch {
        /// Name the caller expected, as `package::Class`.
        declared: String,
        /// Name actually declared in the text, as `package::Class`.
        found: String,
    },
}

impl SourceUnit {
    /// Scan `text` for the package and public type declarations.
    pub fn parse(text: &str) -> Result<Self, MalformedSource> {
        let mut package: Option<String> = None;

        for raw in text.lines() {
            let line = strip_line_comment(raw).trim();

            match &package {
                None => {
                    let Some(rest) = line.strip_prefix("pub mod ") else {
                        continue;
                    };
                    let name = ident_prefix(rest);
                    if !rest[name.len()..].trim_start().starts_with('{') {
                        continue;
                    }
                    package = Some(validate_ident(name)?);
                }
                Some(pkg) => {
                    let Some(rest) = line.strip_prefix("pub struct ") else {
                        continue;
                    };
                    let class_name = validate_ident(ident_prefix(rest))?;
                    return Ok(Self {
                        package: pkg.clone(),
                        class_name,
                    });
                }
            }
        }

        match package {
            Some(pkg) => Err(MalformedSource::MissingClass(pkg)),
            None => Err(MalformedSource::MissingPackage),
        }
    }

    /// Parse `text` and check it declares exactly `package::class_name`.
    pub fn expect(text: &str, package: &str, class_name: &str) -> Result<Self, MalformedSource> {
        let unit = Self::parse(text)?;
        if unit.package != package || unit.class_name != class_name {
            return Err(MalformedSource::Mismatch {
                declared: format!("{package}::{class_name}"),
                found: unit.qualified_name(),
            });
        }
        Ok(unit)
    }

    /// `package::Class`.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.package, self.class_name)
    }
}

fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn ident_prefix(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

fn validate_ident(name: &str) -> Result<String, MalformedSource> {
    let valid = !name.is_empty()
        && name != "_"
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name.to_string())
    } else {
        Err(MalformedSource::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_package_and_class() {
        let src = "//! generated\n\
                   // pub mod commented {\n\
                   pub mod demo {\n\
                   \x20   use std::io;\n\
                   \x20   pub struct Model_1 {\n\
                   \x20       count: u32,\n\
                   \x20   }\n\
                   }\n\
                   fn main() {}\n";
        let unit = SourceUnit::parse(src).unwrap();
        assert_eq!(unit.package, "demo");
        assert_eq!(unit.class_name, "Model_1");
        assert_eq!(unit.qualified_name(), "demo::Model_1");
    }

    #[test]
    fn struct_must_start_its_own_line() {
        let err = SourceUnit::parse("pub mod sim { pub struct Queue; }").unwrap_err();
        assert_eq!(err, MalformedSource::MissingClass("sim".into()));

        let unit = SourceUnit::parse("pub mod sim {\npub struct Queue;\n}").unwrap();
        assert_eq!(unit.class_name, "Queue");
    }

    #[test]
    fn missing_package_is_malformed() {
        assert_eq!(
            SourceUnit::parse("pub struct Model_1;\nfn main() {}"),
            Err(MalformedSource::MissingPackage)
        );
        assert_eq!(
            SourceUnit::parse("pub mod demo;\npub struct Model_1;"),
            Err(MalformedSource::MissingPackage)
        );
    }

    #[test]
    fn missing_class_is_malformed() {
        assert_eq!(
            SourceUnit::parse("pub mod demo {\n    struct Hidden;\n}\n"),
            Err(MalformedSource::MissingClass("demo".into()))
        );
    }

    #[test]
    fn invalid_identifier_is_malformed() {
        assert_eq!(
            SourceUnit::parse("pub mod 9lives {\n}"),
            Err(MalformedSource::InvalidIdentifier("9lives".into()))
        );
    }

    #[test]
    fn expect_rejects_mismatched_names() {
        let src = "pub mod demo {\n    pub struct Model_1;\n}\n";
        assert!(SourceUnit::expect(src, "demo", "Model_1").is_ok());
        assert_eq!(
            SourceUnit::expect(src, "demo", "Model_2"),
            Err(MalformedSource::Mismatch {
                declared: "demo::Model_2".into(),
                found: "demo::Model_1".into(),
            })
        );
    }
}
