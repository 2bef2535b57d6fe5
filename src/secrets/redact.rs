//! Masking of secret values in captured output

use crate::secrets::SecretMaterial;
use secrecy::ExposeSecret;

pub const REDACTED: &str = "[REDACTED]";

/// Replaces every secret value with [`REDACTED`]
///
/// Borrows the values from the step's secret material, so it cannot outlive
/// the step invocation.
#[derive(Debug, Default)]
pub struct Redactor<'a> {
    values: Vec<&'a str>,
}

impl<'a> Redactor<'a> {
    pub fn new<I>(materials: I) -> Self
    where
        I: IntoIterator<Item = &'a SecretMaterial>,
    {
        let mut values: Vec<&'a str> = materials
            .into_iter()
            .map(|material| material.expose_secret())
            .filter(|v| !v.is_empty())
            .collect();
        // Longest first so a value containing another is masked whole
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));
        values.dedup();
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn redact(&self, text: &str) -> String {
        let mut output = text.to_string();
        for value in &self.values {
            if output.contains(value) {
                output = output.replace(value, REDACTED);
            }
        }
        output
    }
}
