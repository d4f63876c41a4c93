//! System prompt assembly for persona workers

use tracing::debug;

use crate::persona::PersonaProfile;

/// Build the system prompt a persona worker attaches to a model request:
/// the persona's own prompt, followed by the recent room transcript when
/// there is one.
pub fn build_persona_prompt(profile: &PersonaProfile, transcript: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(&profile.system_prompt);

    if !transcript.is_empty() {
        prompt.push_str("\n\n## Recent Conversation:\n");
        prompt.push_str(transcript);
    }

    debug!(
        "Built prompt for persona '{}' ({} chars)",
        profile.id,
        prompt.len()
    );

    prompt
}
