mod ai_analysis;
mod app;
mod dicom;
mod favorites;
mod format;
mod ingest;
mod launch;
mod recent;
mod renderer;
mod settings;
mod storage;
mod study;
mod study_cache;
mod viewer;
mod viewport;
mod windowing;

use launch::LaunchRequest;

fn main() -> eframe::Result<()> {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .try_init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let (initial_request, initial_status) = match launch::parse_launch_request_from_args(&cli_args)
    {
        Ok(Some(LaunchRequest::ShowHelp)) => {
            println!("{}", launch::USAGE);
            return Ok(());
        }
        Ok(Some(LaunchRequest::ShowVersion)) => {
            println!("openscans {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Ok(request) => (request, None),
        Err(err) => {
            log::warn!("{err}");
            (None, Some(format!("Launch args error: {err}")))
        }
    };

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_min_inner_size([720.0, 480.0])
            .with_decorations(false)
            .with_resizable(true)
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "OpenScans Viewer",
        native_options,
        Box::new(move |_cc| {
            Ok(Box::new(app::OpenScansApp::new(
                storage::Storage::user(),
                initial_request.clone(),
                initial_status.clone(),
            )))
        }),
    )
}
