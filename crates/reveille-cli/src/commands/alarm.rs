//! Alarm management commands for CLI.

use chrono::{DateTime, Local, Timelike, Utc};
use clap::Subcommand;
use reveille_core::alarm::parse_time_of_day;
use reveille_core::{AlarmId, AlarmValue, Alert, Config, CoreError, DaysOfWeek};

use super::runtime::{self, Runtime};

#[derive(Subcommand)]
pub enum AlarmAction {
    /// List alarms in display order
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one alarm
    Show {
        /// Alarm ID
        id: AlarmId,
    },
    /// Create an alarm
    Create {
        /// Time of day as HH:MM (default: now)
        #[arg(long)]
        time: Option<String>,
        /// Repeat days: "mon,wed,fri", "weekdays", "weekends", "every day"
        #[arg(long)]
        days: Option<String>,
        /// Label
        #[arg(long)]
        label: Option<String>,
        /// Ring a pre-alarm before the main alarm
        #[arg(long)]
        prealarm: bool,
        /// Enable right away
        #[arg(long)]
        enable: bool,
    },
    /// Edit an alarm
    Edit {
        /// Alarm ID
        id: AlarmId,
        /// New time of day as HH:MM
        #[arg(long)]
        time: Option<String>,
        /// New repeat days
        #[arg(long)]
        days: Option<String>,
        /// New label
        #[arg(long)]
        label: Option<String>,
        /// Pre-alarm on or off
        #[arg(long)]
        prealarm: Option<bool>,
        /// Vibrate on or off
        #[arg(long)]
        vibrate: Option<bool>,
        /// Alert sound: "default", "silent" or a URI
        #[arg(long)]
        alert: Option<String>,
    },
    /// Enable an alarm
    Enable {
        /// Alarm ID
        id: AlarmId,
    },
    /// Disable an alarm
    Disable {
        /// Alarm ID
        id: AlarmId,
    },
    /// Snooze a ringing alarm
    Snooze {
        /// Alarm ID
        id: AlarmId,
        /// Snooze until HH:MM instead of the snooze duration
        #[arg(long)]
        until: Option<String>,
    },
    /// Dismiss a ringing or snoozed alarm
    Dismiss {
        /// Alarm ID
        id: AlarmId,
    },
    /// Skip the next occurrence
    Skip {
        /// Alarm ID
        id: AlarmId,
    },
    /// Delete an alarm
    Delete {
        /// Alarm ID
        id: AlarmId,
    },
    /// Show the next upcoming alarm
    Next,
}

pub async fn run(action: AlarmAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let rt = runtime::start(&config).await?;
    let result = execute(&rt, &config, action).await;
    rt.alarms.shutdown().await;
    result
}

async fn execute(
    rt: &Runtime,
    config: &Config,
    action: AlarmAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let alarms = &rt.alarms;

    match action {
        AlarmAction::List { json } => {
            let all = alarms.alarms();
            if json {
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else if all.is_empty() {
                println!("no alarms");
            } else {
                for alarm in &all {
                    println!("{}", summary(alarm));
                }
            }
        }
        AlarmAction::Show { id } => {
            let alarm = alarms.get(id).ok_or(CoreError::AlarmNotFound(id))?;
            println!("{}", serde_json::to_string_pretty(&alarm)?);
        }
        AlarmAction::Create {
            time,
            days,
            label,
            prealarm,
            enable,
        } => {
            let (hour, minutes) = match time {
                Some(time) => parse_time_of_day(&time)?,
                None => {
                    let now = Local::now();
                    (now.hour(), now.minute())
                }
            };
            let days = match days {
                Some(days) => days.parse::<DaysOfWeek>()?,
                None => DaysOfWeek::NONE,
            };
            let template = AlarmValue::new(0, hour, minutes)
                .with_days(days)
                .with_label(label.unwrap_or_default())
                .with_prealarm(prealarm)
                .with_alert(Alert::from(config.alarm.default_alert.as_str()))
                .with_enabled(enable);
            let created = alarms.create_alarm(template)?;
            alarms.settle().await;
            println!("Alarm created: {}", created.id);
            print_current(rt, created.id)?;
        }
        AlarmAction::Edit {
            id,
            time,
            days,
            label,
            prealarm,
            vibrate,
            alert,
        } => {
            let mut edited = alarms.get(id).ok_or(CoreError::AlarmNotFound(id))?;
            if let Some(time) = time {
                let (hour, minutes) = parse_time_of_day(&time)?;
                edited = edited.with_time(hour, minutes);
            }
            if let Some(days) = days {
                edited = edited.with_days(days.parse()?);
            }
            if let Some(label) = label {
                edited = edited.with_label(label);
            }
            if let Some(prealarm) = prealarm {
                edited = edited.with_prealarm(prealarm);
            }
            if let Some(vibrate) = vibrate {
                edited = edited.with_vibrate(vibrate);
            }
            if let Some(alert) = alert {
                edited = edited.with_alert(Alert::from(alert));
            }
            alarms.change(id, edited)?;
            alarms.settle().await;
            print_current(rt, id)?;
        }
        AlarmAction::Enable { id } => {
            alarms.enable(id, true)?;
            alarms.settle().await;
            print_current(rt, id)?;
        }
        AlarmAction::Disable { id } => {
            alarms.enable(id, false)?;
            alarms.settle().await;
            print_current(rt, id)?;
        }
        AlarmAction::Snooze { id, until } => {
            match until {
                Some(until) => {
                    let (hour, minute) = parse_time_of_day(&until)?;
                    alarms.snooze_until(id, hour, minute)?;
                }
                None => alarms.snooze(id)?,
            }
            alarms.settle().await;
            print_current(rt, id)?;
        }
        AlarmAction::Dismiss { id } => {
            alarms.dismiss(id)?;
            alarms.settle().await;
            print_current(rt, id)?;
        }
        AlarmAction::Skip { id } => {
            alarms.request_skip(id)?;
            alarms.settle().await;
            print_current(rt, id)?;
        }
        AlarmAction::Delete { id } => {
            alarms.delete(id)?;
            alarms.settle().await;
            println!("Alarm deleted: {id}");
        }
        AlarmAction::Next => match alarms.next_alarm() {
            Some(next) => {
                let estimated = if next.estimated { " (estimated)" } else { "" };
                println!(
                    "alarm {} at {}{estimated}",
                    next.id,
                    local_time(Some(next.at))
                );
            }
            None => println!("no upcoming alarm"),
        },
    }
    Ok(())
}

fn print_current(rt: &Runtime, id: AlarmId) -> Result<(), Box<dyn std::error::Error>> {
    let alarm = rt.alarms.get(id).ok_or(CoreError::AlarmNotFound(id))?;
    println!("{}", summary(&alarm));
    Ok(())
}

fn summary(alarm: &AlarmValue) -> String {
    format!(
        "{:>4}  {:02}:{:02}  {:<10}  {:<18}  {:<16}  {}",
        alarm.id,
        alarm.hour,
        alarm.minutes,
        alarm.days_of_week.to_string(),
        alarm.state.to_string(),
        local_time(alarm.next_time),
        alarm.label
    )
}

fn local_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.with_timezone(&Local).format("%a %Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
