use rand::{Rng, distributions::Alphanumeric};

use super::ProbeOutcome;

/// Partie locale aléatoire, en minuscules, qui ne devrait exister nulle part.
pub fn random_local_part(len: usize) -> String {
    let length = len.clamp(12, 32);
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("probe-{}", body.to_ascii_lowercase())
}

/// Confiance accordée à une conclusion de sonde de catch-all.
pub fn confidence_for(outcome: ProbeOutcome) -> f32 {
    match outcome {
        ProbeOutcome::Accepted | ProbeOutcome::Rejected => 0.95,
        ProbeOutcome::Ambiguous => 0.4,
        ProbeOutcome::Timeout | ProbeOutcome::ConnectionError => 0.2,
    }
}
