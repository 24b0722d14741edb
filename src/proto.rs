// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Generated wire types for `proto/varbridge.proto`.

pub mod v1 {
    tonic::include_proto!("varbridge.v1");
}
