use pm25_forecast::{pipeline, PipelineConfig};

fn main() {
    let config = PipelineConfig::default();
    if let Err(err) = pipeline::run(&config) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
