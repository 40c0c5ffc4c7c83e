use super::{colorize_state, json_pretty, with_spinner, EXIT_SUCCESS};
use brickyard_client::Client;
use brickyard_core::api::NodeAddRequest;
use brickyard_core::entries::HostNames;
use brickyard_core::{HealthState, Lifecycle};

pub struct AddArgs<'a> {
    pub cluster: &'a str,
    pub zone: u32,
    pub manage: &'a [String],
    pub storage: &'a [String],
}

pub fn add(client: &Client, args: &AddArgs<'_>, json: bool) -> Result<u8, String> {
    let req = NodeAddRequest {
        cluster: args.cluster.to_owned().into(),
        zone: args.zone,
        hostnames: HostNames {
            manage: args.manage.to_vec(),
            storage: args.storage.to_vec(),
        },
    };
    let node = with_spinner("adding node…", "node added", || client.node_add(&req))?;
    if json {
        println!("{}", json_pretty(&node)?);
    } else {
        println!("node {} added to cluster {}", node.id, node.cluster);
    }
    Ok(EXIT_SUCCESS)
}

pub fn info(client: &Client, id: &str, json: bool) -> Result<u8, String> {
    let node = client.node_info(id).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&node)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("id:       {}", node.id);
    println!("cluster:  {}", node.cluster);
    println!("zone:     {}", node.zone);
    println!("state:    {}", colorize_state(&node.state().to_string()));
    println!("health:   {}", colorize_state(&node.health.to_string()));
    println!("manage:   {}", node.hostnames.manage.join(", "));
    println!("storage:  {}", node.hostnames.storage.join(", "));
    println!("devices:  {}", node.devices.len());
    for device in &node.devices {
        println!("  {device}");
    }
    Ok(EXIT_SUCCESS)
}

pub fn delete(client: &Client, id: &str) -> Result<u8, String> {
    with_spinner("removing node…", "node removed", || client.node_delete(id))?;
    Ok(EXIT_SUCCESS)
}

pub fn set_state(client: &Client, id: &str, state: &str, json: bool) -> Result<u8, String> {
    let health = state
        .parse::<HealthState>()
        .map_err(|e| e.to_string())?;
    let node = client
        .node_set_state(id, health)
        .map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&node)?);
    } else {
        println!("node {} is now {}", node.id, colorize_state(&node.health.to_string()));
    }
    Ok(EXIT_SUCCESS)
}
