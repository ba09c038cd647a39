pub const NAME: &str = "Prakriti";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Value sent in the `User-Agent` header of every API call
pub fn user_agent() -> String {
    format!("{}/{}", NAME.to_lowercase(), VERSION)
}
