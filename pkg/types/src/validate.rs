use anyhow::{Result, bail};

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate a generate-name prefix: it must become a valid name once a
/// suffix of `suffix_len` characters is appended.
pub fn validate_generate_name(prefix: &str, suffix_len: usize) -> Result<()> {
    if prefix.starts_with('-') {
        bail!("generate-name '{}' must not start with a hyphen", prefix);
    }
    validate_name(&format!("{}{}", prefix, "a".repeat(suffix_len)))
}
