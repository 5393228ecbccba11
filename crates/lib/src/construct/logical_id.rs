//! Template logical ids derived from construct paths.

use sha2::{Digest, Sha256};

/// Omitted from both the human part and the hash input.
const HIDDEN_ID: &str = "Default";

/// Omitted from the human part only.
const HIDDEN_FROM_HUMAN_ID: &str = "Resource";

const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 240;
const MAX_ID_LEN: usize = 255;

/// Unique logical id for the path components below a stack.
///
/// A single component is used verbatim (alphanumerics only). Longer paths
/// concatenate their human-readable parts and append the first eight
/// upper-case hex characters of the SHA-256 of the full path.
pub fn make_unique_id(components: &[&str]) -> String {
  let components: Vec<&str> = components.iter().copied().filter(|c| *c != HIDDEN_ID).collect();

  if components.len() == 1 {
    let candidate = remove_non_alphanumeric(components[0]);
    if candidate.len() <= MAX_ID_LEN {
      return candidate;
    }
  }

  let hash = path_hash(&components);
  let mut human: String = remove_dupes(&components)
    .into_iter()
    .filter(|c| *c != HIDDEN_FROM_HUMAN_ID)
    .map(remove_non_alphanumeric)
    .collect();
  human.truncate(MAX_HUMAN_LEN);

  format!("{human}{hash}")
}

fn path_hash(components: &[&str]) -> String {
  let digest = Sha256::digest(components.join("/").as_bytes());
  hex::encode_upper(digest)[..HASH_LEN].to_string()
}

fn remove_non_alphanumeric(s: &str) -> String {
  s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Drops consecutive repeats: `[a, a, b]` becomes `[a, b]`.
fn remove_dupes<'a>(components: &[&'a str]) -> Vec<&'a str> {
  let mut out: Vec<&str> = Vec::with_capacity(components.len());
  for c in components {
    if out.last() != Some(c) {
      out.push(c);
    }
  }
  out
}
