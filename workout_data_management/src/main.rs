use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workout_data_management::{DataManager, DataManagerError};

/// CLI for manual data operations
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the workouts of a user, newest first
    List { user_id: i64 },
    /// Print a single workout
    Show { workout_id: i64 },
    /// Write the route of a workout to a gpx file
    ExportGpx { workout_id: i64 },
    /// Delete a workout and its route
    Delete { workout_id: i64 },
}

#[tokio::main]
async fn main() -> Result<(), DataManagerError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let data_manager = DataManager::start().await?;

    match cli.command {
        Command::List { user_id } => {
            for workout in data_manager.get_user_workouts(user_id).await? {
                let record = &workout.record;
                println!(
                    "{:>6}  {}  {:<8}  {:>6}s  {:>8.2} km  {:>6.0} kcal",
                    workout.workout_id,
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.activity_kind,
                    record.duration_seconds,
                    record.distance_km,
                    record.calories_estimate,
                );
            }
        }
        Command::Show { workout_id } => {
            let workout = data_manager.get_workout(workout_id).await?;
            println!("{:#?}", workout);
        }
        Command::ExportGpx { workout_id } => {
            let path = data_manager.export_gpx(workout_id).await?;
            println!("{}", path.display());
        }
        Command::Delete { workout_id } => {
            data_manager.delete_workout(workout_id).await?;
            tracing::info!("Deleted workout {}", workout_id);
        }
    }

    Ok(())
}
