fn main() -> anyhow::Result<()> {
    hnp::run()?;
    Ok(())
}
