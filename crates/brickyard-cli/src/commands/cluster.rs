use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use brickyard_client::Client;
use brickyard_core::Lifecycle;

pub fn create(client: &Client, json: bool) -> Result<u8, String> {
    let cluster = client.cluster_create().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&cluster)?);
    } else {
        println!("cluster {} created", cluster.id);
    }
    Ok(EXIT_SUCCESS)
}

pub fn list(client: &Client, json: bool) -> Result<u8, String> {
    let ids = client.cluster_list().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&ids)?);
    } else if ids.is_empty() {
        println!("no clusters defined");
    } else {
        for id in &ids {
            println!("{id}");
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn info(client: &Client, id: &str, json: bool) -> Result<u8, String> {
    let cluster = client.cluster_info(id).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&cluster)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("id:       {}", cluster.id);
    println!("state:    {}", colorize_state(&cluster.state().to_string()));
    println!("nodes:    {}", cluster.nodes.len());
    for node in &cluster.nodes {
        println!("  {node}");
    }
    println!("volumes:  {}", cluster.volumes.len());
    for volume in &cluster.volumes {
        println!("  {volume}");
    }
    Ok(EXIT_SUCCESS)
}

pub fn delete(client: &Client, id: &str) -> Result<u8, String> {
    client.cluster_delete(id).map_err(|e| e.to_string())?;
    println!("cluster {id} deleted");
    Ok(EXIT_SUCCESS)
}
