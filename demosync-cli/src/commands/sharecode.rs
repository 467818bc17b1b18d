//! `demosync sharecode <code>`

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use demosync_core::ShareCode;

/// Decode a match share code.
#[derive(Args, Debug)]
pub struct SharecodeArgs {
    /// Share code, e.g. CSGO-xxxxx-xxxxx-xxxxx-xxxxx-xxxxx.
    pub code: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct DecodedJson {
    share_code: String,
    match_id: u64,
    reservation_id: u64,
    tv_port: u16,
}

impl SharecodeArgs {
    pub fn run(self) -> Result<()> {
        let code = ShareCode::parse(self.code.trim())
            .with_context(|| format!("'{}' is not a share code", self.code))?;
        let decoded = code
            .decode()
            .with_context(|| format!("cannot decode '{code}'"))?;

        if self.json {
            let json = DecodedJson {
                share_code: code.as_str().to_string(),
                match_id: decoded.match_id.0,
                reservation_id: decoded.reservation_id,
                tv_port: decoded.tv_port,
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
            return Ok(());
        }

        println!("share code:     {code}");
        println!("match id:       {}", decoded.match_id);
        println!("reservation id: {}", decoded.reservation_id);
        println!("tv port:        {}", decoded.tv_port);
        Ok(())
    }
}
