use slog::{Logger, o, Drain};
use slog_async::Async;
use slog_term::{FullFormat, TermDecorator};

pub fn create_logger(for_module: &str) -> Logger {
    let decorator = TermDecorator::new().build();
    let drain = FullFormat::new(decorator)
        .use_utc_timestamp()
        .use_original_order()
        .build()
        .fuse();
    let async_drain = Async::new(drain).build().fuse();
    Logger::root(
        async_drain,
        o!("component" => "ECGCore", "module" => for_module.to_owned()),
    )
}
