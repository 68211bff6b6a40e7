/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use phes_tools::{init_context, pairing};
use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut ctx = match init_context(&args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("pairing: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = pairing::run_pairing(&mut ctx) {
        eprintln!("pairing: {}", e);
        process::exit(1);
    }
}
