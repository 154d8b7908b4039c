use qnxtainer_common::{ConnectionState, ServerSnapshot};
use qnxtainer_sync::SyncView;

pub fn connection_line(connection: &ConnectionState) -> String {
    match (connection.connected, &connection.last_error) {
        (true, _) => "connected".to_string(),
        (false, Some(err)) => format!("disconnected: {}", err),
        (false, None) => "disconnected".to_string(),
    }
}

pub fn print_view(view: &SyncView) {
    println!("endpoint   {}", view.endpoint);
    println!("connection {}", connection_line(&view.connection));
    match &view.snapshot {
        Some(snapshot) => print_snapshot(snapshot),
        None => println!("no server state cached"),
    }
}

pub fn print_snapshot(snapshot: &ServerSnapshot) {
    println!();
    println!("IMAGES ({})", snapshot.images.len());
    for image in &snapshot.images {
        let containers = snapshot.containers_for_image(&image.id).count();
        println!(
            "  {:<12} {:<32} {}  containers: {}",
            image.id,
            image.reference(),
            image.created_at.format("%Y-%m-%d %H:%M"),
            containers
        );
    }

    println!();
    println!(
        "CONTAINERS ({} running, {} stopped)",
        snapshot.running_count(),
        snapshot.stopped_count()
    );
    for container in &snapshot.containers {
        println!(
            "  {:<12} {:<24} {:<9} cpu {:>5.1}%  mem {:>7.1} MB  image {}",
            container.id,
            container.display_name(),
            container.status.as_str(),
            container.cpu_percent,
            container.memory_mb,
            container.image_id().unwrap_or("-")
        );
    }
}
