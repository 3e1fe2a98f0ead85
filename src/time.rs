/// Gets the unix timestamp in milliseconds.
pub fn unix_timestamp_ms() -> i64 {
    #[cfg(test)]
    {
        if let Some(cell) = NOW_OVERRIDE.get() {
            if let Some(override_val) = *cell.lock().expect("lock is poisoned") {
                return override_val;
            }
        }
    }

    let now = std::time::SystemTime::now();

    #[allow(clippy::expect_used)]
    let dur = now
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .expect("time went backwards");

    dur.as_millis() as i64
}

#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(test)]
static NOW_OVERRIDE: OnceLock<Mutex<Option<i64>>> = OnceLock::new();

#[cfg(test)]
pub(crate) fn set_unix_timestamp_ms_for_test(value: Option<i64>) {
    let cell = NOW_OVERRIDE.get_or_init(|| Mutex::new(None));
    *cell.lock().expect("lock is poisoned") = value;
}
