/// Wall-clock Unix time in seconds, the unit of the persisted rotation state.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
