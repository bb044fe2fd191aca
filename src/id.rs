//! Id generation for jobs, batches, and lock tokens.

use uuid::Uuid;

/// Generates a fresh job id.
///
/// Ids are UUIDv4, optionally prefixed by the caller. A caller-supplied id
/// always wins over generation (see [`crate::queue::JobQueue::enqueue_with`]);
/// this module only covers the generated case.
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a fresh batch id.
pub fn new_batch_id() -> String {
    format!("batch:{}", Uuid::new_v4())
}

/// Generates an opaque lock token naming the current holder of a resource.
///
/// The token only needs to be unguessable and unique per acquisition; it is
/// compared for equality on release, never parsed.
pub fn new_lock_token() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_job_id(), new_job_id());
        assert_ne!(new_lock_token(), new_lock_token());
    }

    #[test]
    fn batch_id_has_prefix() {
        assert!(new_batch_id().starts_with("batch:"));
    }
}
