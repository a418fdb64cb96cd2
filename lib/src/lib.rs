// Copyright 2024 The Mgt Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Library for mgt, a version-control tool for meta-repositories whose
//! tracked entries pin nested sub-repositories.

#![deny(unused_must_use)]

pub mod backend;
pub mod commit_engine;
pub mod error;
pub mod file_util;
pub mod hooks;
pub mod mem_store;
pub mod object_id;
pub mod opener;
pub mod parallel;
pub mod repo_ast;
pub mod repo_path;
pub mod sequencer;
pub mod split_message;
pub mod status;
pub mod store;
pub mod synthetic_gc;
pub mod workspace;
