//! helpers for logging.

/// Log to stderr.
///
/// If called multiple times in the same process, only applies once.  Tests call this freely, so a logger which was
/// already installed by someone else is left alone.
pub fn log_to_stderr() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let res = env_logger::builder()
            .format(|buf, record| {
                use std::io::Write;

                let now = time::OffsetDateTime::now_utc();

                writeln!(
                    buf,
                    "{} {} time={} target={}",
                    record.level(),
                    record.args(),
                    now,
                    record.target()
                )
            })
            .try_init();

        if res.is_err() {
            log::debug!("A logger was already installed");
        }
    });
}
