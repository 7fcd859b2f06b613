// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Binary entrypoint: run one demo round and print the report.

fn main() {
    env_logger::init();
    nexus_mailbox::cli::run();
}
