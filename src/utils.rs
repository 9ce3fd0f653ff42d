use rand::Rng;
use rand_distr::{Distribution, Poisson};

pub fn now_ts() -> f64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs_f64()
}

pub fn iso_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Canonical form of a bot name, used only as a join key (never for display).
///
/// Version tokens are stripped before punctuation, otherwise "2.0" would
/// survive as "20". The trailing loop matters: removing "bot" can expose a
/// fresh "bot" substring (e.g. "bobott"), and matching needs a fixed point.
pub fn normalize_name(name: &str) -> String {
    let mut s = name.to_lowercase();
    s = s.replace("1.0", "").replace("2.0", "");
    s.retain(|c| !c.is_whitespace() && c != '_' && c != '-' && c != '.');
    while s.contains("bot") {
        s = s.replace("bot", "");
    }
    s
}

pub fn poisson_sample(rng: &mut impl Rng, lambda: f64) -> u64 {
    match Poisson::new(lambda) {
        Ok(d) => d.sample(rng) as u64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_noise() {
        assert_eq!(normalize_name("Wolf Bot"), "wolf");
        assert_eq!(normalize_name("wolf_bot"), "wolf");
        assert_eq!(normalize_name("Falcon Bot 2.0"), "falcon");
        assert_eq!(normalize_name("sniper-bot 1.0"), "sniper");
        assert_eq!(normalize_name("Quantum"), "quantum");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "Wolf Bot",
            "FALCON_BOT 2.0",
            "bobott",
            "b.ot",
            "11.0.0",
            "",
            "  spaced  out  ",
            "robot",
        ] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn normalized_output_never_contains_bot() {
        for raw in ["bobott", "botbot", "b.ot", "ROBOTBOT"] {
            assert!(!normalize_name(raw).contains("bot"), "raw={raw:?}");
        }
    }
}
