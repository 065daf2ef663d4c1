//! Processors command - list built-in processors.

use anyhow::Result;

use super::Context;
use crate::builtin;

/// Run the processors command.
pub fn run(ctx: &Context) -> Result<()> {
    let registry = builtin::registry();
    for module in registry.modules() {
        if let Some(processor) = registry.create(module) {
            if ctx.verbose {
                println!("{module}\t{}\t{}", processor.code(), processor.description());
            } else {
                println!("{module}\t{}", processor.description());
            }
        }
    }
    Ok(())
}
