use std::io::Write;

use openbase_api::{
    AppInfo, CommandInfo, EndpointsInfo, InspectClient, ModelInfo, SerializerInfo, TaskInfo,
    ViewsInfo,
};
use openbase_chat::{ChatOrchestrator, ChatUpdate};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::settings::{BackendSettings, SettingsStore};

#[derive(Debug, Snafu)]
pub enum ReplError {
    #[snafu(display("failed to read terminal input"))]
    ReadInput { source: std::io::Error },
}

const HELP: &str = "\
commands:
  /sessions             list chat sessions
  /new [name]           create a session and make it active
  /switch <id>          activate another session
  /abort                stop the in-flight response
  /clear-error          dismiss the recorded error
  /project <id>         choose the project to inspect
  /apps                 list the project's Django apps
  /models <app>         show an app's models
  /serializers <app>    show an app's serializers
  /tasks <app>          show an app's background tasks
  /commands <app> [name]  show an app's management commands, or one in detail
  /endpoints <app>      show an app's URL patterns, routers, and viewsets
  /help                 this text
  /quit                 exit
anything else is sent to the agent.";

pub async fn run(
    orchestrator: ChatOrchestrator,
    inspect: InspectClient,
    settings: SettingsStore,
) -> Result<(), ReplError> {
    println!("openbase: agent chat and project inspector (/help for commands)");

    orchestrator.bootstrap().await;
    if let Some(session) = orchestrator.active_session().await {
        println!("resumed session {} ({})", session.id, display_name(&session.name));
        for message in orchestrator.messages().await {
            print_transcript_message(&message);
        }
    }
    if let Some(error) = orchestrator.last_error().await {
        println!("error: {error} (/clear-error to dismiss)");
    }

    let mut updates = orchestrator.subscribe().await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => render_update(update),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context(ReadInputSnafu)? else {
                    break;
                };
                if !dispatch(&line, &orchestrator, &inspect, &settings).await {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn render_update(update: ChatUpdate) {
    match update {
        ChatUpdate::StreamChunk(chunk) => {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }
        ChatUpdate::StreamFinished => println!(),
        ChatUpdate::StreamAborted { materialized } => {
            if materialized {
                println!("\n[response aborted]");
            } else {
                println!("[nothing to abort yet]");
            }
        }
        ChatUpdate::StreamFailed(message) | ChatUpdate::FailureRecorded(message) => {
            println!("error: {message} (/clear-error to dismiss)");
        }
        ChatUpdate::FailureCleared => println!("error cleared"),
        ChatUpdate::ActiveSessionChanged(Some(session)) => {
            println!("→ session {} ({})", session.id, display_name(&session.name));
        }
        ChatUpdate::ActiveSessionChanged(None) => println!("→ no active session"),
        // The transcript prints on demand; chunks already went to the
        // terminal, so appended messages are not echoed again.
        ChatUpdate::TranscriptLoaded
        | ChatUpdate::MessageAppended(_)
        | ChatUpdate::RosterChanged => {}
    }
}

/// Handles one input line. Returns false to quit.
async fn dispatch(
    line: &str,
    orchestrator: &ChatOrchestrator,
    inspect: &InspectClient,
    settings: &SettingsStore,
) -> bool {
    let input = line.trim();
    if input.is_empty() {
        return true;
    }

    let (command, argument) = match input.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (input, ""),
    };

    match command {
        "/quit" | "/exit" => return false,
        "/help" => println!("{HELP}"),
        "/sessions" => {
            orchestrator.refresh_sessions().await;
            let sessions = orchestrator.sessions().await;
            if sessions.is_empty() {
                println!("no sessions yet; send a message to start one");
            }
            let active = orchestrator.active_session().await.map(|session| session.id);
            for session in sessions {
                let marker = if Some(&session.id) == active.as_ref() { "*" } else { " " };
                println!(
                    "{marker} {}  {}  updated {}",
                    session.id,
                    display_name(&session.name),
                    session.updated_at
                );
            }
        }
        "/new" => {
            let name = if argument.is_empty() { None } else { Some(argument) };
            orchestrator.create_session(name).await;
        }
        "/switch" => {
            if argument.is_empty() {
                println!("usage: /switch <session-id>");
            } else {
                orchestrator.switch_session(argument).await;
                for message in orchestrator.messages().await {
                    print_transcript_message(&message);
                }
            }
        }
        "/abort" => orchestrator.abort().await,
        "/clear-error" => orchestrator.clear_error().await,
        "/project" => {
            if argument.is_empty() {
                let current = settings.settings().project.clone();
                if current.is_empty() {
                    println!("no project selected; usage: /project <id>");
                } else {
                    println!("inspecting project {current}");
                }
            } else {
                let updated = BackendSettings {
                    project: argument.to_string(),
                    ..(*settings.settings()).clone()
                };
                match settings.update(updated) {
                    Ok(()) => println!("inspecting project {argument}"),
                    Err(error) => println!("failed to save settings: {error}"),
                }
            }
        }
        "/apps" => {
            if let Some(project) = require_project(settings) {
                match inspect.list_apps(&project).await {
                    Ok(apps) => render_apps(&apps),
                    Err(error) => println!("error: {error}"),
                }
            }
        }
        "/models" => run_app_view(inspect, settings, argument, AppView::Models).await,
        "/serializers" => run_app_view(inspect, settings, argument, AppView::Serializers).await,
        "/tasks" => run_app_view(inspect, settings, argument, AppView::Tasks).await,
        "/commands" => {
            let (app, command_name) = match argument.split_once(char::is_whitespace) {
                Some((app, name)) => (app, Some(name.trim())),
                None => (argument, None),
            };
            match command_name {
                Some(name) => show_command_detail(inspect, settings, app, name).await,
                None => run_app_view(inspect, settings, app, AppView::Commands).await,
            }
        }
        "/endpoints" => run_app_view(inspect, settings, argument, AppView::Endpoints).await,
        _ if command.starts_with('/') => {
            println!("unknown command {command}; /help lists the commands");
        }
        _ => {
            if orchestrator.is_streaming().await {
                println!("a response is still streaming; /abort it first");
            } else {
                orchestrator.send_message(input).await;
            }
        }
    }

    true
}

#[derive(Clone, Copy)]
enum AppView {
    Models,
    Serializers,
    Tasks,
    Commands,
    Endpoints,
}

async fn run_app_view(inspect: &InspectClient, settings: &SettingsStore, app: &str, view: AppView) {
    let Some(project) = require_project(settings) else {
        return;
    };
    if app.is_empty() {
        println!("usage: /<view> <app>");
        return;
    }

    let package = match inspect.package_for_app(&project, app).await {
        Ok(Some(package)) => package,
        Ok(None) => {
            println!("unknown app '{app}'; /apps lists the project's apps");
            return;
        }
        Err(error) => {
            println!("error: {error}");
            return;
        }
    };

    let outcome = match view {
        AppView::Models => inspect
            .list_models(&project, &package, app)
            .await
            .map(|models| render_models(&models)),
        AppView::Serializers => inspect
            .list_serializers(&project, &package, app)
            .await
            .map(|serializers| render_serializers(&serializers)),
        AppView::Tasks => inspect
            .list_tasks(&project, &package, app)
            .await
            .map(|tasks| render_tasks(&tasks)),
        AppView::Commands => inspect
            .list_commands(&project, &package, app)
            .await
            .map(|commands| render_commands(&commands)),
        AppView::Endpoints => {
            let outcome = inspect
                .endpoints(&project, &package, app)
                .await
                .map(|endpoints| render_endpoints(&endpoints));
            // Viewset details are optional server-side; older backends do
            // not serve the route.
            if outcome.is_ok() {
                match inspect.views(&project, &package, app).await {
                    Ok(views) => render_viewsets(&views),
                    Err(error) => {
                        tracing::debug!(error = %error, "views endpoint unavailable");
                    }
                }
            }
            outcome
        }
    };

    if let Err(error) = outcome {
        println!("error: {error}");
    }
}

async fn show_command_detail(
    inspect: &InspectClient,
    settings: &SettingsStore,
    app: &str,
    command: &str,
) {
    let Some(project) = require_project(settings) else {
        return;
    };

    let package = match inspect.package_for_app(&project, app).await {
        Ok(Some(package)) => package,
        Ok(None) => {
            println!("unknown app '{app}'; /apps lists the project's apps");
            return;
        }
        Err(error) => {
            println!("error: {error}");
            return;
        }
    };

    match inspect.command_detail(&project, &package, app, command).await {
        Ok(detail) => {
            println!("command {}", detail.name);
            if !detail.help.is_empty() {
                println!("  {}", detail.help);
            }
            for argument in &detail.arguments {
                println!("  argument {}", argument.names.join(", "));
            }
            if !detail.handle_body_source.is_empty() {
                println!("{}", detail.handle_body_source);
            }
        }
        Err(error) => println!("error: {error}"),
    }
}

fn require_project(settings: &SettingsStore) -> Option<String> {
    let project = settings.settings().project.clone();
    if project.is_empty() {
        println!("no project selected; use /project <id> first");
        None
    } else {
        Some(project)
    }
}

fn display_name(name: &str) -> &str {
    if name.trim().is_empty() { "untitled" } else { name }
}

fn print_transcript_message(message: &openbase_api::ChatMessage) {
    let speaker = match message.role {
        openbase_api::ChatRole::User => "you",
        openbase_api::ChatRole::Assistant => "agent",
        openbase_api::ChatRole::System => "system",
    };
    println!("{speaker}: {}", message.content);
}

fn render_apps(apps: &[AppInfo]) {
    if apps.is_empty() {
        println!("no apps discovered");
        return;
    }
    for app in apps {
        println!("{}  ({})", app.name, app.package_name);
    }
}

fn render_models(models: &[ModelInfo]) {
    if models.is_empty() {
        println!("no models in this app");
        return;
    }
    for model in models {
        println!("model {}", model.name);
        if !model.docstring.is_empty() {
            println!("  {}", model.docstring.lines().next().unwrap_or_default());
        }
        for field in &model.fields {
            println!("  {}: {}", field.name, field.field_type);
        }
        for method in &model.methods {
            println!("  def {}()", method.name);
        }
    }
}

fn render_serializers(serializers: &[SerializerInfo]) {
    if serializers.is_empty() {
        println!("no serializers in this app");
        return;
    }
    for serializer in serializers {
        println!("serializer {} (model {})", serializer.name, serializer.model);
        if !serializer.fields.is_empty() {
            println!("  fields: {}", serializer.fields.join(", "));
        }
        if !serializer.read_only_fields.is_empty() {
            println!("  read-only: {}", serializer.read_only_fields.join(", "));
        }
    }
}

fn render_tasks(tasks: &[TaskInfo]) {
    if tasks.is_empty() {
        println!("no background tasks in this app");
        return;
    }
    for task in tasks {
        let kind = if task.is_async { "async task" } else { "task" };
        println!("{kind} {}", task.name);
        if !task.docstring.is_empty() {
            println!("  {}", task.docstring.lines().next().unwrap_or_default());
        }
        if !task.args.regular_args.is_empty() {
            println!("  args: {}", task.args.regular_args.join(", "));
        }
    }
}

fn render_commands(commands: &[CommandInfo]) {
    if commands.is_empty() {
        println!("no management commands in this app");
        return;
    }
    for command in commands {
        println!("{}  ({})", command.name, command.file);
    }
}

fn render_endpoints(endpoints: &EndpointsInfo) {
    if endpoints.urlpatterns.is_empty() && endpoints.router_registrations.is_empty() {
        println!("no URL patterns in this app");
        return;
    }
    for pattern in &endpoints.urlpatterns {
        println!("{}  →  {}", pattern.route, pattern.view_name);
    }
    for registration in &endpoints.router_registrations {
        println!("router {}  →  {}", registration.prefix, registration.viewset);
    }
}

fn render_viewsets(views: &ViewsInfo) {
    for viewset in &views.viewsets {
        println!("viewset {} (serializer {})", viewset.name, viewset.serializer_class);
        for action in &viewset.actions {
            println!("  action {}", action.name);
        }
    }
}
