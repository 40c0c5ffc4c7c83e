use super::{colorize_state, format_kib, json_pretty, with_spinner, EXIT_SUCCESS};
use brickyard_client::Client;
use brickyard_core::api::DeviceAddRequest;
use brickyard_core::Lifecycle;

pub fn add(client: &Client, node: &str, name: &str, json: bool) -> Result<u8, String> {
    let req = DeviceAddRequest {
        node: node.to_owned().into(),
        name: name.to_owned(),
    };
    let device = with_spinner("preparing device…", "device ready", || client.device_add(&req))?;
    if json {
        println!("{}", json_pretty(&device)?);
    } else {
        println!(
            "device {} ({}) added with {}",
            device.id,
            device.name,
            format_kib(device.storage.total)
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn info(client: &Client, id: &str, json: bool) -> Result<u8, String> {
    let device = client.device_info(id).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&device)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("id:       {}", device.id);
    println!("name:     {}", device.name);
    println!("node:     {}", device.node);
    println!("state:    {}", colorize_state(&device.state().to_string()));
    println!("health:   {}", colorize_state(&device.health.to_string()));
    println!(
        "storage:  {} total, {} free, {} used",
        format_kib(device.storage.total),
        format_kib(device.storage.free),
        format_kib(device.storage.used)
    );
    println!("bricks:   {}", device.bricks.len());
    Ok(EXIT_SUCCESS)
}

pub fn delete(client: &Client, id: &str) -> Result<u8, String> {
    with_spinner("tearing down device…", "device removed", || {
        client.device_delete(id)
    })?;
    Ok(EXIT_SUCCESS)
}
