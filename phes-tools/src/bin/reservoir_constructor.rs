/*
This code is part of the PHES site-search geospatial analysis library.
License: MIT
*/
use phes_tools::{constructor, init_context};
use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 5 {
        eprintln!("Not enough arguments. Need <lon> <lat> <res_id> <dam_height>");
        process::exit(1);
    }
    let ctx = match init_context(&args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("reservoir_constructor: {}", e);
            process::exit(1);
        }
    };
    let dam_height = match args[4].parse::<f64>() {
        Ok(h) => h,
        Err(_) => {
            eprintln!("reservoir_constructor: bad dam height '{}'", args[4]);
            process::exit(1);
        }
    };
    if let Err(e) = constructor::run_reservoir_constructor(&ctx, &args[3], dam_height) {
        eprintln!("reservoir_constructor: {}", e);
        process::exit(1);
    }
}
