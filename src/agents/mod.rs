pub mod preambles;

pub use preambles::{
    FACTION_TURN_PREAMBLE, NARRATOR_PREAMBLE, ORCHESTRATOR_PREAMBLE,
    SESSION_RECORDER_PREAMBLE, WORLD_ADVANCE_PREAMBLE,
};

/// Sub-agents start their whole answer with this to decline an instruction.
pub const REFUSAL_SENTINEL: &str = "REFUSED:";

// A sub-agent's deliberate non-action. Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    pub reason: String,
}

impl Refusal {
    // TODO: switch to a structured refusal flag once sub-agents return JSON summaries.
    pub fn detect(output: &str) -> Option<Refusal> {
        let rest = output.trim_start().strip_prefix(REFUSAL_SENTINEL)?;
        Some(Refusal {
            reason: rest.trim().to_string(),
        })
    }
}

pub fn system_prompt(preamble: &str, game_system: &str) -> String {
    let preamble = preamble.trim();
    let game_system = game_system.trim();
    if game_system.is_empty() {
        return preamble.to_string();
    }
    format!("{preamble}\n\n# Game System\n\n{game_system}")
}

/// Sub-agents additionally see the world as it stands before they act.
pub fn system_prompt_with_world(preamble: &str, game_system: &str, world: &str) -> String {
    let base = system_prompt(preamble, game_system);
    if world.trim().is_empty() {
        return format!("{base}\n\n# World State\n\n(no world files yet)");
    }
    format!("{base}\n\n# World State\n\n{}", world.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_needs_the_sentinel_at_the_start() {
        assert_eq!(
            Refusal::detect("  REFUSED: the guild is already gone"),
            Some(Refusal {
                reason: "the guild is already gone".into()
            })
        );
        assert_eq!(Refusal::detect("The guild REFUSED: to pay"), None);
        assert_eq!(Refusal::detect("refused: lowercase is a normal summary"), None);
    }

    #[test]
    fn prompts_carry_game_system_and_world() {
        let prompt = system_prompt_with_world("# Keeper", "Low fantasy harbor town.", "## clock.md\nDay 2\n");
        assert!(prompt.starts_with("# Keeper"));
        assert!(prompt.contains("# Game System\n\nLow fantasy harbor town."));
        assert!(prompt.ends_with("## clock.md\nDay 2"));
        assert_eq!(system_prompt(NARRATOR_PREAMBLE, ""), NARRATOR_PREAMBLE.trim());
    }
}
