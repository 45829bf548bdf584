//! Home layout templates.
//!
//! A layout such as `{id}` or `users/{username}` is rendered against a
//! principal to find the home directory relative to the tree root. Rendering
//! never consults the storage root.

use crate::path::VirtualPath;
use crate::principal::Principal;
use arbor_core::error::{ArborError, Result};
use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\s*([a-z_]+)\s*\}").expect("Invalid placeholder pattern"));

/// A parsed home layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutTemplate {
    template: String,
}

impl LayoutTemplate {
    /// Parse a layout, rejecting unknown placeholders up front.
    pub fn parse(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if template.trim_matches('/').trim().is_empty() {
            return Err(ArborError::template("empty layout"));
        }
        for caps in PLACEHOLDER.captures_iter(&template) {
            field_name_known(&caps[1])?;
        }
        let stripped = PLACEHOLDER.replace_all(&template, "");
        if stripped.contains('{') || stripped.contains('}') {
            return Err(ArborError::template(format!(
                "malformed placeholder in layout '{}'",
                template
            )));
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Render the layout for `principal` into a path relative to the root.
    ///
    /// A field that is empty or contains a separator cannot be rendered.
    pub fn render(&self, principal: &Principal) -> Result<VirtualPath> {
        let mut error = None;
        let rendered = PLACEHOLDER.replace_all(&self.template, |caps: &regex::Captures<'_>| {
            match field_value(&caps[1], principal) {
                Ok(value) => value.to_string(),
                Err(e) => {
                    error.get_or_insert(e);
                    String::new()
                }
            }
        });
        if let Some(e) = error {
            return Err(e);
        }

        let path = VirtualPath::new(&rendered)
            .map_err(|e| ArborError::template(format!("layout '{}': {}", self.template, e)))?;
        if path.is_root() {
            return Err(ArborError::template(format!(
                "layout '{}' renders to the root",
                self.template
            )));
        }
        Ok(path)
    }
}

fn field_name_known(name: &str) -> Result<()> {
    match name {
        "id" | "idp" | "username" | "mail" | "display_name" => Ok(()),
        other => Err(ArborError::template(format!("unknown layout field '{}'", other))),
    }
}

fn field_value<'a>(name: &str, principal: &'a Principal) -> Result<&'a str> {
    let value = match name {
        "id" => principal.id.opaque_id.as_str(),
        "idp" => principal.id.idp.as_str(),
        "username" => principal.username.as_str(),
        "mail" => principal.mail.as_str(),
        "display_name" => principal.display_name.as_str(),
        other => return Err(ArborError::template(format!("unknown layout field '{}'", other))),
    };
    if value.trim().is_empty() {
        return Err(ArborError::template(format!(
            "principal {} has no {}",
            principal.id, name
        )));
    }
    if value.contains('/') || value == ".." || value == "." {
        return Err(ArborError::template(format!(
            "{} of principal {} is not a valid path segment",
            name, principal.id
        )));
    }
    Ok(value)
}
