//! Embeds the git commit and build time reported by `/health`.
//!
//! Release images built without a `.git` directory pass `VERGEN_GIT_SHA`
//! through the environment instead.

use std::error::Error;
use vergen_gix::{Build, Emitter, Gix};

fn main() -> Result<(), Box<dyn Error>> {
    if std::env::var("VERGEN_GIT_SHA").is_ok() {
        println!("cargo:warning=socialgate: using VERGEN_GIT_SHA from the environment");
        return Ok(());
    }

    let build = Build::all_build();
    let gix = Gix::all_git();
    Emitter::default()
        .add_instructions(&build)?
        .add_instructions(&gix)?
        .emit()?;
    Ok(())
}
