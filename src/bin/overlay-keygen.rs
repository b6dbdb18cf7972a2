// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Stand-alone identity provisioning tool: creates (or rotates, if due) the
//! overlay node's Ed25519 identity key under a given data directory and
//! prints its public key as hex.

use anyhow::Result;
use overlay_mesh::core::security::keystore::KeyStore;
use std::time::Duration;

fn main() -> Result<()> {
    let data_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let rotate_days: u64 = std::env::args()
        .nth(2)
        .and_then(|v| v.parse().ok())
        .unwrap_or(90);

    std::fs::create_dir_all(&data_dir)?;
    let keystore = KeyStore::open(&data_dir, Duration::from_secs(rotate_days * 86_400))
        .map_err(|_| anyhow::anyhow!("failed to open keystore at {data_dir}"))?;

    println!("{}", hex::encode(keystore.public_key()));
    Ok(())
}
