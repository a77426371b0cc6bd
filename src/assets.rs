use rust_embed::RustEmbed;

/// Files compiled into the binary: tracking script, index page, bot signatures
#[derive(RustEmbed)]
#[folder = "assets"]
pub struct Assets;
