//! Canned replies.

use stridechat_core::Intent;

/// Longest LLM fragment appended to a hybrid reply, in characters.
pub const MAX_FRAGMENT_CHARS: usize = 280;

const FALLBACK_NOTE: &str =
    "I can't reach the assistant service right now, so here is our standard guidance.";

const GENERIC_FALLBACK: &str = "Sorry, I can't give a detailed answer right now. Most step tracking problems are fixed by opening the app, checking that activity permissions are granted and turning off battery optimization for it. Please try again in a minute.";

/// The fixed reply for `intent`, if it has one.
pub fn template_for(intent: Intent) -> Option<&'static str> {
    let text = match intent {
        Intent::Greeting => "Hi! I can help with step tracking, syncing and permission problems. What's going on?",
        Intent::Thanks => "You're welcome! Let me know if anything else comes up.",
        Intent::Farewell => "Goodbye! Keep on walking.",
        Intent::StepsNotSyncing => "Let's get your steps syncing again:\n1. Open the app so it can refresh in the foreground.\n2. Check that you're signed in and connected to the internet.\n3. Pull down on the dashboard to force a sync.",
        Intent::BatteryOptimization => "Battery optimization can pause step tracking in the background:\n1. Open your phone's battery settings.\n2. Find the app in the list of optimized apps.\n3. Set it to \"Don't optimize\" or \"Unrestricted\".",
        Intent::PermissionDenied => "Step tracking needs activity permissions:\n1. Open your phone's settings and go to Apps.\n2. Select the app and open Permissions.\n3. Allow \"Physical activity\" (or \"Motion & Fitness\").",
        Intent::WrongStepCount => "If your step count looks off:\n1. Carry your phone in a pocket rather than a bag.\n2. Make sure only one source is writing steps to your health data.\n3. Recalibrate by walking a known distance.",
        Intent::General | Intent::Unknown => return None,
    };
    Some(text)
}

/// Template body followed by a generated fragment, truncated to
/// [`MAX_FRAGMENT_CHARS`] at a word boundary.
pub fn compose_hybrid(intent: Intent, fragment: &str) -> String {
    let fragment = truncate_words(fragment.trim(), MAX_FRAGMENT_CHARS);
    match (template_for(intent), fragment.is_empty()) {
        (Some(body), false) => format!("{body}\n\n{fragment}"),
        (Some(body), true) => body.to_string(),
        (None, _) => fragment,
    }
}

/// What to say when the remote path is unavailable. Never empty.
pub fn fallback_reply(intent: Intent) -> String {
    match template_for(intent) {
        Some(body) if intent.is_diagnostic() => format!("{FALLBACK_NOTE}\n\n{body}"),
        Some(body) => body.to_string(),
        None => GENERIC_FALLBACK.to_string(),
    }
}

fn truncate_words(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => format!("{}...", cut[..idx].trim_end()),
        _ => format!("{cut}..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_non_general_intent_has_a_template() {
        for intent in [
            Intent::Greeting,
            Intent::Thanks,
            Intent::Farewell,
            Intent::StepsNotSyncing,
            Intent::BatteryOptimization,
            Intent::PermissionDenied,
            Intent::WrongStepCount,
        ] {
            assert!(template_for(intent).is_some(), "missing template for {intent}");
        }
        assert!(template_for(Intent::Unknown).is_none());
    }

    #[test]
    fn hybrid_appends_fragment_after_body() {
        let reply = compose_hybrid(Intent::PermissionDenied, "  Since it's denied, re-enable it.  ");
        assert!(reply.starts_with("Step tracking needs activity permissions"));
        assert!(reply.ends_with("\n\nSince it's denied, re-enable it."));

        let bare = compose_hybrid(Intent::PermissionDenied, "   ");
        assert_eq!(Some(bare.as_str()), template_for(Intent::PermissionDenied));
    }

    #[test]
    fn long_fragments_are_truncated_on_word_boundary() {
        let long = "word ".repeat(100);
        let reply = compose_hybrid(Intent::WrongStepCount, &long);
        let fragment = reply.rsplit("\n\n").next().unwrap();
        assert!(fragment.ends_with("word..."));
        assert!(fragment.chars().count() <= MAX_FRAGMENT_CHARS + 3);
    }

    #[test]
    fn fallback_is_never_empty() {
        assert!(fallback_reply(Intent::StepsNotSyncing).starts_with(FALLBACK_NOTE));
        assert_eq!(fallback_reply(Intent::Unknown), GENERIC_FALLBACK);
        assert_eq!(Some(fallback_reply(Intent::Thanks).as_str()), template_for(Intent::Thanks));
    }
}
