//! `backsub`: accumulates the per-pixel mean and standard deviation of a
//! frame sequence on the GPU.
//!
//! - the default command runs the accumulation headless (or in a preview
//!   window with `--window`) and optionally exports the StdDev still;
//! - `verify` recomputes the statistics on the CPU and compares them with an
//!   export.

mod cli;
mod reference;
mod run;
mod verify;
mod window;

use anyhow::Result;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::run(cli)
}
