/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use phes_tools::{init_context, screening};
use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    let ctx = match init_context(&args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("screening: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = screening::run_screening(&ctx) {
        eprintln!("screening: {}", e);
        process::exit(1);
    }
}
