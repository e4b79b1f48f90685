fn main() -> anyhow::Result<()> {
    findex_chat::run()
}
