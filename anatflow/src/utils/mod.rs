//! Utility helpers for run identity, timestamps, and logging setup.

mod logging;
mod timestamps;

pub use logging::init_subscriber;
pub use timestamps::iso_timestamp;

use uuid::Uuid;

/// Generates a fresh assembly run id.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id_is_v4() {
        let id = generate_run_id();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
    }
}
