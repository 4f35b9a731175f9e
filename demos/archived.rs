use {
    logshelf::{Compression, LogShelfBuilder, RotationSize, TimeZone},
    std::{io::Write, time::Duration},
};

/// Writes enough to rotate a few times, then lists what ended up in the
/// archive.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut logger = LogShelfBuilder::new()
        .directory("./logs/archived")
        .file_name("app")
        .size_limit(RotationSize::MB(1))
        .archive_directory("./logs/archived/archive")
        .compression(Compression::Gzip)
        .retention_days(7) // Keep one week of archives
        .time_zone(TimeZone::UTC)
        .close_grace(Duration::from_millis(200))
        .build()?;

    for i in 1..=35_000 {
        writeln!(
            logger,
            "Log entry #{i}: This is a sample log message that will contribute to file size"
        )?;
        if i % 5_000 == 0 {
            // Timestamps have second resolution; give each rotation its own name.
            std::thread::sleep(Duration::from_millis(1_100));
        }
    }
    logger.rotate()?;

    for day in std::fs::read_dir("./logs/archived/archive")?.flatten() {
        for file in std::fs::read_dir(day.path())?.flatten() {
            println!("{}", file.path().display());
        }
    }
    logger.shutdown()?;
    Ok(())
}
