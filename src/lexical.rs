//! Deterministic lexical pseudo-embedding — the offline fallback backend.
//!
//! When the hosted embedding provider is unreachable or unconfigured, memory
//! captions are embedded from lexical features alone. The output is fully
//! deterministic (same text → same vector, every process, every run) so that
//! similarity search stays testable and reproducible without network access,
//! and the curated keyword table gives related captions real overlap instead
//! of pure hash noise.
//!
//! Vector layout (384 dims total):
//! - `[0, 300)`   — curated keyword slots (emotions, family, places,
//!   activities, seasons, milestones); +1.0 per table hit
//! - `[300, 380)` — FNV-1a hash buckets for unmapped vocabulary; +0.5 per token
//! - `[380, 384)` — whole-text features: token count, `!`, `?`, long-token
//!   fraction
//!
//! Changing the dimensionality or the table invalidates previously stored
//! vectors; both are implementation details, not a stable contract.

use async_trait::async_trait;

use crate::embeddings::{EmbeddingBackend, EmbeddingError};
use crate::vectors::l2_normalize;

/// Embedding dimensionality for the reference deployment.
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// First index of the hash-bucket region for unmapped vocabulary.
const HASH_REGION_START: usize = 300;

/// Number of hash buckets.
const HASH_REGION_LEN: usize = 80;

/// Reserved whole-text feature indices.
const FEATURE_TOKEN_COUNT: usize = 380;
const FEATURE_EXCLAIM: usize = 381;
const FEATURE_QUESTION: usize = 382;
const FEATURE_LONG_TOKENS: usize = 383;

/// Weight added per keyword-table hit.
const KEYWORD_WEIGHT: f32 = 1.0;

/// Weight added per hash-bucketed token.
const HASH_WEIGHT: f32 = 0.5;

/// Curated keyword table. Related terms deliberately share slots (e.g. beach /
/// sand / sandcastle) so captions about the same kind of moment cluster even
/// without the hosted model. All slots live below `HASH_REGION_START`.
const KEYWORD_SLOTS: &[(&str, &[usize])] = &[
    // Emotions
    ("happy", &[0, 1]),
    ("joy", &[0, 2]),
    ("laugh", &[1, 2]),
    ("smile", &[1, 3]),
    ("love", &[4, 5]),
    ("excited", &[0, 6]),
    ("proud", &[6, 7]),
    ("brave", &[7, 8]),
    ("scared", &[9, 10]),
    ("sad", &[9, 11]),
    ("surprise", &[6, 8]),
    // Family
    ("mom", &[20, 21]),
    ("mother", &[20, 21]),
    ("dad", &[20, 22]),
    ("father", &[20, 22]),
    ("grandma", &[23, 24]),
    ("grandpa", &[23, 25]),
    ("sister", &[26, 27]),
    ("brother", &[26, 28]),
    ("cousin", &[26, 31]),
    ("baby", &[29, 30]),
    ("family", &[20, 26]),
    ("child", &[29, 31]),
    ("kid", &[29, 31]),
    // Places
    ("beach", &[50, 51, 52]),
    ("ocean", &[51, 53]),
    ("sea", &[51, 53]),
    ("sand", &[50, 52]),
    ("sandcastle", &[50, 52, 54]),
    ("park", &[55, 56]),
    ("playground", &[55, 57]),
    ("school", &[58, 59]),
    ("home", &[60, 61]),
    ("garden", &[62, 63]),
    ("forest", &[64, 65]),
    ("mountain", &[66, 67]),
    ("lake", &[68, 53]),
    ("zoo", &[69, 70]),
    ("farm", &[71, 63]),
    // Activities
    ("swim", &[52, 80]),
    ("swimming", &[52, 80]),
    ("bike", &[81, 82]),
    ("ride", &[81, 83]),
    ("hike", &[64, 84]),
    ("camping", &[64, 85]),
    ("fishing", &[68, 86]),
    ("soccer", &[87, 88]),
    ("dance", &[89, 90]),
    ("dancing", &[89, 90]),
    ("sing", &[91, 92]),
    ("singing", &[91, 92]),
    ("paint", &[93, 94]),
    ("draw", &[93, 95]),
    ("read", &[96, 97]),
    ("play", &[55, 98]),
    ("game", &[98, 99]),
    ("build", &[54, 100]),
    ("building", &[54, 100]),
    ("castle", &[54, 101]),
    ("adventure", &[102, 103]),
    ("explore", &[102, 104]),
    ("trip", &[105, 106]),
    ("travel", &[105, 107]),
    ("vacation", &[105, 108]),
    ("visit", &[106, 109]),
    // Seasons and weather
    ("summer", &[120, 121]),
    ("winter", &[122, 123]),
    ("spring", &[124, 125]),
    ("autumn", &[126, 127]),
    ("fall", &[126, 127]),
    ("snow", &[122, 128]),
    ("rain", &[129, 130]),
    ("sunny", &[121, 131]),
    ("sun", &[121, 131]),
    // Milestones and celebrations
    ("birthday", &[140, 141]),
    ("first", &[142, 143]),
    ("graduation", &[144, 145]),
    ("wedding", &[146, 147]),
    ("holiday", &[148, 149]),
    ("christmas", &[148, 150]),
    ("halloween", &[148, 151]),
    ("party", &[140, 152]),
    ("tooth", &[153, 143]),
    // Pets
    ("dog", &[160, 161]),
    ("puppy", &[160, 161]),
    ("cat", &[162, 163]),
    ("kitten", &[162, 163]),
    ("pet", &[160, 162]),
    // Storytime
    ("story", &[170, 171]),
    ("book", &[170, 172]),
    ("bedtime", &[171, 173]),
    ("dream", &[173, 174]),
    ("magic", &[174, 175]),
    ("star", &[175, 176]),
    ("moon", &[176, 177]),
    ("night", &[173, 177]),
];

/// FNV-1a 64-bit. Pinned here (rather than `DefaultHasher`) because the hash
/// → bucket assignment must be stable across platforms, processes, and
/// releases to keep stored fallback vectors comparable.
fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Lowercase, strip punctuation, split on whitespace, drop tokens of
/// length ≤ 2.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

/// Keyword lookup, tolerant of simple plurals ("sandcastles" → "sandcastle").
fn keyword_slots(token: &str) -> Option<&'static [usize]> {
    for (word, slots) in KEYWORD_SLOTS {
        if *word == token {
            return Some(slots);
        }
    }
    let singular = token.strip_suffix('s')?;
    for (word, slots) in KEYWORD_SLOTS {
        if *word == singular {
            return Some(slots);
        }
    }
    None
}

/// Fixed low-amplitude pattern substituted for degenerate input, so empty
/// captions still yield a finite, NaN-free vector of the right length.
fn degenerate_pattern() -> Vec<f32> {
    (0..EMBEDDING_DIMENSIONS)
        .map(|i| (i as f32 * 0.1).sin() * 0.01)
        .collect()
}

/// Compute the deterministic lexical pseudo-embedding for `text`.
///
/// Unit-normalized for any input with at least one token or punctuation
/// feature; degenerate input falls back to [`degenerate_pattern`].
pub fn lexical_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIMENSIONS];
    let tokens = tokenize(text);

    for token in &tokens {
        if let Some(slots) = keyword_slots(token) {
            for slot in slots {
                v[*slot] += KEYWORD_WEIGHT;
            }
        }
        // Every token also gets a stable hash bucket, so unmapped vocabulary
        // still produces a repeatable signal.
        let bucket = HASH_REGION_START + (fnv1a_64(token.as_bytes()) as usize % HASH_REGION_LEN);
        v[bucket] += HASH_WEIGHT;
    }

    v[FEATURE_TOKEN_COUNT] = (tokens.len().min(32) as f32) / 32.0;
    v[FEATURE_EXCLAIM] = if text.contains('!') { 1.0 } else { 0.0 };
    v[FEATURE_QUESTION] = if text.contains('?') { 1.0 } else { 0.0 };
    if !tokens.is_empty() {
        let long = tokens.iter().filter(|t| t.len() > 6).count();
        v[FEATURE_LONG_TOKENS] = long as f32 / tokens.len() as f32;
    }

    if !l2_normalize(&mut v) {
        return degenerate_pattern();
    }
    v
}

/// `EmbeddingBackend` over the lexical pseudo-embedding. Infallible and fully
/// offline; used directly in tests and as the fallback half of
/// `FallbackEmbeddingClient`.
#[derive(Debug, Clone, Default)]
pub struct LexicalEmbeddingClient;

#[async_trait]
impl EmbeddingBackend for LexicalEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(lexical_embedding(text))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

// ============================================================================
// TESTS
// ============================================================================
