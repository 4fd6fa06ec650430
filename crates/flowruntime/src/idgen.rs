use uuid::Uuid;

/// Generates flow instance ids.
///
/// Ids are random v4 UUIDs rendered without hyphens, so generation needs no
/// shared state and is safe from any number of concurrent runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn next_as_string(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}
