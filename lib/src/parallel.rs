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

//! Bounded parallel dispatch over the async store facade.

use std::future::Future;

use futures::stream;
use futures::StreamExt as _;
use futures::TryStreamExt as _;

/// Default concurrency for per-sub fan-out.
pub const DEFAULT_PARALLELISM: usize = 8;

/// Runs `f` over all items with at most `limit` in flight. Results come back
/// in input order; the first error aborts the remaining work.
pub async fn do_in_parallel<T, U, E, F, Fut>(
    items: Vec<T>,
    limit: usize,
    f: F,
) -> Result<Vec<U>, E>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U, E>>,
{
    stream::iter(items.into_iter().map(f))
        .buffered(limit.max(1))
        .try_collect()
        .await
}
