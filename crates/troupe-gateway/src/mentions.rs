//! Mention grammar over the closed persona roster

use regex::Regex;

use troupe_core::{PersonaId, Roster};

/// Parses `@name` mentions, case-insensitive, over the fixed roster.
///
/// The grammar is `(?i)@(p1|p2|…)\b` with the alternation built from the
/// roster; arbitrary nicknames never match. Stripping the tokens from a
/// string makes a re-parse yield the empty set.
pub struct MentionParser {
    regex: Regex,
}

impl MentionParser {
    pub fn new(roster: &Roster) -> Self {
        let alternation: Vec<String> = roster
            .ids()
            .map(|id| regex::escape(id.as_str()))
            .collect();
        let pattern = format!(r"(?i)@({})\b", alternation.join("|"));
        Self {
            // The roster is non-empty and every id is escaped.
            regex: Regex::new(&pattern).expect("mention pattern is valid"),
        }
    }

    /// Distinct mentioned personas in first-occurrence order.
    pub fn parse(&self, content: &str) -> Vec<PersonaId> {
        let mut targets = Vec::new();
        for caps in self.regex.captures_iter(content) {
            if let Some(name) = caps.get(1) {
                let id = PersonaId::new(name.as_str());
                if !targets.contains(&id) {
                    targets.push(id);
                }
            }
        }
        targets
    }

    /// Remove every mention token and trim the result.
    pub fn strip(&self, content: &str) -> String {
        self.regex.replace_all(content, "").trim().to_string()
    }
}
