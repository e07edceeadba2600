// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::fmt::Debug;

use kube::{api::PostParams, Api, Resource, ResourceExt};
use kube_core::ObjectMeta;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use super::base::{label, SWAPPED_WITH_LABEL};
use crate::{error::map_write_error, Error, Result};

/// Objects whose traffic target can be exchanged with another object of the same kind.
pub trait Swappable: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize {
    fn exchange_targets(&mut self, other: &mut Self);
}

/// Sets `swapped-with` on both sides, or clears both when they already point at each other.
pub fn toggle_swap_labels(src: &mut ObjectMeta, src_app: &str, dst: &mut ObjectMeta, dst_app: &str) {
    let unswap = label(src, SWAPPED_WITH_LABEL) == Some(dst_app) && label(dst, SWAPPED_WITH_LABEL) == Some(src_app);
    for (meta, counterpart) in [(src, dst_app), (dst, src_app)] {
        let labels = meta.labels.get_or_insert_with(Default::default);
        if unswap {
            labels.remove(SWAPPED_WITH_LABEL);
        } else {
            labels.insert(SWAPPED_WITH_LABEL.to_owned(), counterpart.to_owned());
        }
    }
}

/// Two replaces with a compensating write of the first one when the second fails.
pub struct SwapTransaction<K> {
    api: Api<K>,
}

impl<K: Swappable> SwapTransaction<K> {
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }

    pub async fn commit(&self, src: K, src_app: &str, dst: K, dst_app: &str) -> Result<()> {
        let (src_name, dst_name) = (src.name_any(), dst.name_any());
        let original_src = src.clone();
        let (mut new_src, mut new_dst) = (src, dst);
        new_src.exchange_targets(&mut new_dst);
        toggle_swap_labels(new_src.meta_mut(), src_app, new_dst.meta_mut(), dst_app);

        let pp = PostParams::default();
        let written_src = self.api.replace(&src_name, &pp, &new_src).await.map_err(|e| map_write_error(e, &src_name))?;
        match self.api.replace(&dst_name, &pp, &new_dst).await {
            Ok(_) => {
                info!("Swapped {src_name} and {dst_name}");
                Ok(())
            },
            Err(e) => {
                let cause = map_write_error(e, &dst_name);
                warn!("Swap of {src_name} and {dst_name} failed {cause}, rolling back {src_name}");
                match self.rollback(&src_name, written_src, original_src).await {
                    Ok(()) => Err(cause),
                    Err(rollback) => Err(Error::SwapRollback { cause: Box::new(cause), rollback: Box::new(rollback) }),
                }
            },
        }
    }

    async fn rollback(&self, name: &str, written: K, original: K) -> Result<()> {
        let mut restored = original;
        restored.meta_mut().resource_version = written.meta().resource_version.clone();
        self.api.replace(name, &PostParams::default(), &restored).await.map_err(|e| map_write_error(e, name))?;
        Ok(())
    }
}
