use super::{colorize_state, json_pretty, with_spinner, EXIT_SUCCESS};
use brickyard_client::Client;
use brickyard_core::api::{VolumeCreateRequest, VolumeExpandRequest};
use brickyard_core::Lifecycle;

pub fn create(
    client: &Client,
    size_gib: u64,
    name: Option<&str>,
    cluster: Option<&str>,
    replica: Option<usize>,
    json: bool,
) -> Result<u8, String> {
    let req = VolumeCreateRequest {
        size_gib,
        name: name.map(str::to_owned),
        cluster: cluster.map(|c| c.to_owned().into()),
        replica,
    };
    let volume = with_spinner("creating volume…", "volume created", || {
        client.volume_create(&req)
    })?;
    if json {
        println!("{}", json_pretty(&volume)?);
    } else {
        println!(
            "volume {} ({}) created: {} GiB, replica {}",
            volume.name, volume.id, volume.size_gib, volume.replica
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn list(client: &Client, json: bool) -> Result<u8, String> {
    let ids = client.volume_list().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&ids)?);
    } else if ids.is_empty() {
        println!("no volumes found");
    } else {
        println!("{:<34} {:<24} {:>8} STATE", "ID", "NAME", "SIZE");
        for id in &ids {
            let volume = client.volume_info(id).map_err(|e| e.to_string())?;
            println!(
                "{:<34} {:<24} {:>5} GiB {}",
                volume.id,
                volume.name,
                volume.size_gib,
                colorize_state(&volume.state().to_string())
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn info(client: &Client, id: &str, json: bool) -> Result<u8, String> {
    let volume = client.volume_info(id).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&volume)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("id:       {}", volume.id);
    println!("name:     {}", volume.name);
    println!("cluster:  {}", volume.cluster);
    println!("state:    {}", colorize_state(&volume.state().to_string()));
    println!("size:     {} GiB", volume.size_gib);
    println!("replica:  {}", volume.replica);
    println!("bricks:   {}", volume.bricks.len());
    for brick in &volume.bricks {
        println!("  {brick}");
    }
    Ok(EXIT_SUCCESS)
}

pub fn expand(client: &Client, id: &str, expand_size_gib: u64, json: bool) -> Result<u8, String> {
    let req = VolumeExpandRequest { expand_size_gib };
    let volume = with_spinner("expanding volume…", "volume expanded", || {
        client.volume_expand(id, &req)
    })?;
    if json {
        println!("{}", json_pretty(&volume)?);
    } else {
        println!("volume {} is now {} GiB", volume.name, volume.size_gib);
    }
    Ok(EXIT_SUCCESS)
}

pub fn delete(client: &Client, id: &str) -> Result<u8, String> {
    with_spinner("deleting volume…", "volume deleted", || client.volume_delete(id))?;
    Ok(EXIT_SUCCESS)
}
