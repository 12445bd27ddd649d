pub mod handlers;

pub use handlers::{get_score_status, get_user_stats, submit_score};
