//! Human-readable deployment slugs
//!
//! Generated slugs look like `brave-amber-falcon`: two distinct adjectives and
//! a noun. Slugs double as DNS labels under the router host, so caller
//! supplied slugs are held to the same label rules.

use uuid::Uuid;

use crate::errors::PipelineError;

const ADJECTIVES: &[&str] = &[
    "agile", "amber", "ancient", "autumn", "bold", "brave", "bright", "brisk", "calm", "clever",
    "cosmic", "crimson", "curious", "dapper", "eager", "early", "electric", "fancy", "fast",
    "fierce", "flying", "fresh", "gentle", "giant", "golden", "grand", "happy", "hidden", "humble",
    "icy", "jolly", "kind", "lively", "lucky", "lunar", "mellow", "mighty", "misty", "modern",
    "nimble", "noble", "odd", "orange", "polite", "proud", "purple", "quick", "quiet", "rapid",
    "royal", "rustic", "shiny", "silent", "silver", "sleepy", "smooth", "solar", "swift", "tidy",
    "tiny", "vivid", "wild", "witty", "young",
];

const NOUNS: &[&str] = &[
    "anchor", "badger", "beacon", "breeze", "canyon", "cedar", "comet", "coral", "crane", "dawn",
    "delta", "dolphin", "dune", "eagle", "ember", "falcon", "fern", "finch", "forest", "fox",
    "galaxy", "garden", "glacier", "harbor", "hawk", "heron", "island", "jaguar", "kettle", "lagoon",
    "lantern", "lark", "lemur", "maple", "meadow", "meteor", "moon", "moose", "nebula", "oasis",
    "otter", "owl", "panda", "pebble", "pine", "planet", "puffin", "quartz", "raven", "reef",
    "river", "robin", "rocket", "sparrow", "summit", "thunder", "tiger", "valley", "violet",
    "walrus", "willow", "wolf", "yak", "zephyr",
];

/// Longest DNS label
pub const MAX_SLUG_LEN: usize = 63;

/// Generate a random `adjective-adjective-noun` slug
pub fn generate_slug() -> String {
    let entropy = Uuid::new_v4().as_u128();
    slug_from_entropy(entropy)
}

fn slug_from_entropy(entropy: u128) -> String {
    let first = (entropy % ADJECTIVES.len() as u128) as usize;
    let rest = entropy / ADJECTIVES.len() as u128;
    // Second adjective drawn from the remaining ones keeps the two distinct
    let offset = (rest % (ADJECTIVES.len() as u128 - 1)) as usize + 1;
    let second = (first + offset) % ADJECTIVES.len();
    let rest = rest / (ADJECTIVES.len() as u128 - 1);
    let noun = (rest % NOUNS.len() as u128) as usize;

    format!("{}-{}-{}", ADJECTIVES[first], ADJECTIVES[second], NOUNS[noun])
}

/// Whether `slug` matches the generator's `word-word-word` shape
pub fn is_generated_shape(slug: &str) -> bool {
    let parts: Vec<&str> = slug.split('-').collect();
    matches!(parts.as_slice(), [a, b, n] if ADJECTIVES.contains(a) && ADJECTIVES.contains(b) && a != b && NOUNS.contains(n))
}

/// Check a caller-supplied slug is usable as a DNS label and storage prefix
pub fn validate_slug(slug: &str) -> Result<(), PipelineError> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(PipelineError::InvalidInput(format!(
            "slug must be 1 to {MAX_SLUG_LEN} characters"
        )));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(PipelineError::InvalidInput(format!(
            "slug {slug:?} may only contain lowercase letters, digits and '-'"
        )));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(PipelineError::InvalidInput(format!(
            "slug {slug:?} must not start or end with '-'"
        )));
    }
    Ok(())
}
