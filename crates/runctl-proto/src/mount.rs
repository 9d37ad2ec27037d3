//! Mount specification mini-language.
//!
//! A mount is described as a comma-separated list of `key=val` tokens, e.g.
//! `type=bind,src=/tmp,dst=/data,options=rbind:ro`. Values containing commas
//! can be wrapped in double quotes; `""` escapes a quote inside a quoted
//! value. Parsing is pure and happens before any remote call.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One filesystem mount, ready to pass through to instance creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Filesystem type, e.g. `bind`.
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub destination: String,
    /// Mount options in the order given, from the colon-delimited `options`
    /// value.
    pub options: Vec<String>,
}

/// Parses a single `--mount` value into a [`MountSpec`].
///
/// Recognized keys: `type`, `source`/`src`, `destination`/`dst`, `options`.
/// A token without exactly one `=`, an unterminated quote, or a repeated key
/// is [`Error::MalformedMountString`]; any other key is
/// [`Error::UnsupportedMountOption`].
pub fn parse_mount(raw: &str) -> Result<MountSpec> {
    let mut mount = MountSpec::default();
    // type, source, destination, options
    let mut seen = [false; 4];

    for field in split_fields(raw)? {
        let Some((key, value)) = field.split_once('=') else {
            return Err(Error::MalformedMountString { raw: field });
        };
        if value.contains('=') {
            return Err(Error::MalformedMountString { raw: field });
        }

        let slot = match key {
            "type" => {
                mount.kind = value.to_string();
                0
            }
            "source" | "src" => {
                mount.source = value.to_string();
                1
            }
            "destination" | "dst" => {
                mount.destination = value.to_string();
                2
            }
            "options" => {
                mount.options = value.split(':').map(str::to_string).collect();
                3
            }
            _ => {
                return Err(Error::UnsupportedMountOption {
                    key: key.to_string(),
                });
            }
        };

        // Each recognized key may appear at most once.
        if seen[slot] {
            return Err(Error::MalformedMountString { raw: field });
        }
        seen[slot] = true;
    }

    Ok(mount)
}

/// Splits a comma-separated record, honoring double-quoted fields.
fn split_fields(raw: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
    }

    if in_quotes {
        return Err(Error::MalformedMountString {
            raw: raw.to_string(),
        });
    }
    fields.push(current);
    Ok(fields)
}
