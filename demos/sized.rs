use {
    logshelf::{LogShelfBuilder, RotationSize},
    std::io::Write,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut logger = LogShelfBuilder::new()
        .directory("./logs")
        .file_name("sized")
        .size_limit(RotationSize::KB(256)) // Start a new file every 256 KB
        .file_mode(0o640) // Set file permissions to: owner rw, group r, others none
        .build()?;

    for i in 1..=10_000 {
        writeln!(
            logger,
            "Log entry #{i}: This is a sample log message that will contribute to file size"
        )?;
    }

    println!("Rotations so far: {}", logger.rotation_count());
    logger.shutdown()?;
    Ok(())
}
