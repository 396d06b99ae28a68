use clap::Parser;
use eframe::egui;
use verify_hands::{Config, ReviewApp};

fn main() -> eframe::Result {
    let config = Config::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    let title = format!("verify-hands - {}", config.base_url);
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(&title),
        ..Default::default()
    };

    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| Ok(Box::new(ReviewApp::new(cc, &config)?))),
    )
}
