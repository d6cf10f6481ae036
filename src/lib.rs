/*
 * This file is part of lsstor.
 *
 * Copyright (C) 2025 lsstor contributors
 *
 * lsstor is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lsstor is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lsstor. If not, see <https://www.gnu.org/licenses/>.
 */

//! lsstor - SCSI and NVMe storage topology for Linux
//!
//! This library walks sysfs to enumerate SCSI logical units, SCSI hosts,
//! NVMe controllers and NVMe namespaces, and resolves for each one its
//! address tuple, device nodes, transport and logical unit identity.

pub mod address;
pub mod byid;
pub mod cli;
pub mod config;
pub mod devnode;
pub mod error;
pub mod logger;
pub mod output;
pub mod sysfs;
pub mod topology;
pub mod transport;
pub mod vpd;
