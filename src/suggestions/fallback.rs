use rand::seq::SliceRandom;

pub fn default_fallback_replies() -> Vec<String> {
    ["Okay", "Sounds good", "Got it, thanks!", "Let me get back to you"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// One neutral stock reply, or none when no phrases are configured.
pub fn pick_fallback(phrases: &[String]) -> Option<String> {
    phrases
        .iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .choose(&mut rand::thread_rng())
        .map(|p| p.to_string())
}
