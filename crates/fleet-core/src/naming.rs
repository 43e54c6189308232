//! Machine naming convention.
//!
//! Every machine FleetGrid creates is named
//! `fleetgrid-<machinetype>-<10 hex digits>`. A listed machine whose name does
//! not parse back to a machinetype is foreign to the scheduler.

use rand::Rng;

/// Prefix shared by every managed machine name.
pub const MACHINE_PREFIX: &str = "fleetgrid-";

/// Generate a fresh machine name for a machinetype.
pub fn machine_name<R: Rng + ?Sized>(machinetype: &str, rng: &mut R) -> String {
    let suffix = rng.random::<u64>() & 0xff_ffff_ffff;
    format!("{MACHINE_PREFIX}{machinetype}-{suffix:010x}")
}

/// Recover the machinetype embedded in a managed machine name.
pub fn machinetype_of(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(MACHINE_PREFIX)?;
    let (machinetype, suffix) = rest.rsplit_once('-')?;
    let well_formed = !machinetype.is_empty()
        && suffix.len() == 10
        && suffix.chars().all(|c| c.is_ascii_hexdigit());
    well_formed.then_some(machinetype)
}

/// Lowercase ASCII letters, digits, '-' and '.', not starting with a separator.
pub fn is_provider_safe(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && !name.starts_with(['-', '.'])
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn generated_names_are_managed_and_parseable() {
        let mut rng = StdRng::seed_from_u64(7);
        let name = machine_name("atlas-prod", &mut rng);
        assert!(name.starts_with("fleetgrid-atlas-prod-"));
        assert!(is_provider_safe(&name));
        assert_eq!(machinetype_of(&name), Some("atlas-prod"));
    }

    #[test]
    fn generated_names_differ() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = machine_name("atlas", &mut rng);
        let b = machine_name("atlas", &mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn foreign_names_are_not_managed() {
        assert_eq!(machinetype_of("web-frontend-1"), None);
        assert_eq!(machinetype_of("fleetgrid-"), None);
        assert_eq!(machinetype_of("fleetgrid-atlas"), None);
        assert_eq!(machinetype_of("fleetgrid-atlas-xyz"), None);
    }

    #[test]
    fn provider_safe_names() {
        assert!(is_provider_safe("cloud.example.com"));
        assert!(is_provider_safe("atlas-2"));
        assert!(!is_provider_safe(""));
        assert!(!is_provider_safe("Atlas"));
        assert!(!is_provider_safe("-atlas"));
        assert!(!is_provider_safe("atlas_prod"));
    }
}
