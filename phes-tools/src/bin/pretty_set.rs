/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use phes_tools::{init_context, pretty_set};
use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut ctx = match init_context(&args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("pretty_set: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = pretty_set::run_pretty_set(&mut ctx) {
        eprintln!("pretty_set: {}", e);
        process::exit(1);
    }
}
