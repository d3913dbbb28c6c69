use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warden_core::LbphClassifier;
use warden_hw::{Camera, Delivery, HardwareLink};

mod app;
mod config;
mod error;
mod terminal;

use app::App;
use config::Config;
use error::WardenError;
use terminal::Terminal;

#[derive(Parser)]
#[command(name = "warden", about = "Face recognition access notifier", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and switch the indicator on for an authorized face
    Recognize,
    /// Retrain the model from the enrollment folder
    Train,
    /// Capture photos of a new person, then retrain
    AddPerson {
        /// Name of the person (becomes their folder name)
        #[arg(short, long)]
        name: String,
    },
    /// Switch the indicator on and off once
    TestLink,
    /// Interactive menu (default)
    Menu,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "warden starting");

    let link = Arc::new(HardwareLink::open(&config.link_config()));
    if link.is_simulated() {
        println!("Microcontroller not found; running in simulation mode.");
    } else {
        println!("Microcontroller connected on {}.", link.name());
    }

    // The face detector is loaded by the first operation that needs it.
    let mut app = App::new(config, Box::new(LbphClassifier::default()), link);

    let result = match cli.command.unwrap_or(Commands::Menu) {
        Commands::Recognize => recognize(&mut app),
        Commands::Train => train(&mut app),
        Commands::AddPerson { name } => add_person(&mut app, &name),
        Commands::TestLink => test_link(&app),
        Commands::Menu => menu(&mut app).map_err(WardenError::from),
    };

    app.shutdown();
    tracing::info!("warden stopped");
    result.map_err(Into::into)
}

fn menu(app: &mut App) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        println!();
        println!("=== warden ===");
        println!("1. Start recognition");
        println!("2. Train model");
        println!("3. Add person (camera capture)");
        println!("4. Test hardware link");
        println!("5. Quit");
        print!("Choose an option: ");
        io::stdout().flush()?;

        let Some(choice) = lines.next().transpose()? else { break };
        let result = match choice.trim() {
            "1" => recognize(app),
            "2" => train(app),
            "3" => {
                print!("Name of the person: ");
                io::stdout().flush()?;
                let Some(name) = lines.next().transpose()? else { break };
                add_person(app, &name)
            }
            "4" => test_link(app),
            "5" => break,
            _ => {
                println!("Invalid option, try again.");
                continue;
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "operation failed");
            println!("Error: {e}");
        }
    }
    println!("Shutting down.");
    Ok(())
}

fn open_camera(app: &App) -> Result<Camera, WardenError> {
    Ok(Camera::open(&app.config().camera_device)?)
}

fn recognize(app: &mut App) -> Result<(), WardenError> {
    app.ensure_model()?;
    let mut camera = open_camera(app)?;
    println!("Recognition started, waiting for an authorized face. Press 'q' to stop.");

    let summary = {
        let mut term = Terminal::enter()?;
        app.run_recognition_session(&mut camera, &mut term)?
    };
    match summary.person {
        Some(person) => println!("Session ended. Identified: {}.", person.name),
        None => println!("Session ended. No authorized face identified."),
    }
    Ok(())
}

fn train(app: &mut App) -> Result<(), WardenError> {
    println!("Training from {} ...", app.config().enrollment_root.display());
    let report = app.run_enrollment()?;
    println!(
        "Model trained: {} people, {} faces from {} images.",
        report.labels.len(),
        report.samples,
        report.images_scanned
    );
    for (label, name) in report.labels.iter() {
        println!("  {label}: {name}");
    }
    for name in &report.skipped_people {
        println!("  skipped {name}: no face found");
    }
    Ok(())
}

fn add_person(app: &mut App, name: &str) -> Result<(), WardenError> {
    let mut camera = open_camera(app)?;
    println!("Capturing photos for {}. Space: capture, Esc: finish.", name.trim());

    let report = {
        let mut term = Terminal::enter()?;
        app.add_person(name, &mut camera, &mut term)?
    };
    if let Some(e) = &report.interrupted {
        println!("Camera stopped during capture: {e}");
    }
    match report.training {
        None => println!("No images captured."),
        Some(training) => {
            println!("{} images captured in {}.", report.captured, report.dir.display());
            let training = training?;
            println!(
                "Model retrained: {} people, {} faces.",
                training.labels.len(),
                training.samples
            );
        }
    }
    Ok(())
}

fn test_link(app: &App) -> Result<(), WardenError> {
    println!("Testing the indicator: on for {}s ...", app.config().link_test_hold_secs);
    match app.test_hardware_link()? {
        Delivery::Sent => println!("Indicator test complete."),
        Delivery::Simulated => println!("Indicator test complete (simulation)."),
    }
    Ok(())
}
