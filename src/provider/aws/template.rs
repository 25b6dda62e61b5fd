//! Template rendering for AWS: `handlebars` stands in for the original's
//! `text/template`, with helpers for region/vpc/vpcid/filter/subnets lookups.
//!
//! Every helper here returns a `RenderError` on bad input instead of
//! panicking — the original's template functions panic on a missing VPC,
//! which would take the whole reconcile loop down with it.

use std::collections::BTreeMap;

use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderErrorReason,
};

use crate::provider::{CloudProviderError, ProviderConfig};

pub(super) async fn render(
    ec2: &aws_sdk_ec2::Client,
    config: &ProviderConfig,
    context: &BTreeMap<String, String>,
    content: &str,
) -> Result<String, CloudProviderError> {
    let vpc = find_cluster_vpc(ec2, &config.cluster_name).await?;
    let subnets = find_cluster_subnets(ec2, &config.cluster_name).await?;

    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_helper("region", Box::new(RegionHelper(config.region.clone())));
    registry.register_helper("vpc", Box::new(VpcHelper(vpc.clone())));
    registry.register_helper("vpcid", Box::new(VpcHelper(vpc)));
    registry.register_helper("subnets", Box::new(SubnetsHelper(subnets)));
    registry.register_helper("filter", Box::new(FilterHelper));

    registry
        .render_template(content, context)
        .map_err(|e| CloudProviderError::Template(e.to_string()))
}

async fn find_cluster_vpc(
    client: &aws_sdk_ec2::Client,
    cluster_name: &str,
) -> Result<String, CloudProviderError> {
    let resp = client
        .describe_vpcs()
        .filters(
            aws_sdk_ec2::types::Filter::builder()
                .name(format!("tag:kubernetes.io/cluster/{cluster_name}"))
                .values("owned")
                .build(),
        )
        .send()
        .await
        .map_err(|e| CloudProviderError::Ec2(e.to_string()))?;

    resp.vpcs()
        .first()
        .and_then(|v| v.vpc_id())
        .map(str::to_string)
        .ok_or_else(|| CloudProviderError::Template(format!("no vpc found for cluster: {cluster_name}")))
}

async fn find_cluster_subnets(
    client: &aws_sdk_ec2::Client,
    cluster_name: &str,
) -> Result<Vec<String>, CloudProviderError> {
    let resp = client
        .describe_subnets()
        .filters(
            aws_sdk_ec2::types::Filter::builder()
                .name(format!("tag:kubernetes.io/cluster/{cluster_name}"))
                .values("owned")
                .build(),
        )
        .send()
        .await
        .map_err(|e| CloudProviderError::Ec2(e.to_string()))?;

    Ok(resp
        .subnets()
        .iter()
        .filter_map(|s| s.subnet_id())
        .map(str::to_string)
        .collect())
}

struct RegionHelper(String);

impl handlebars::HelperDef for RegionHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        _h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        out.write(&self.0)?;
        Ok(())
    }
}

struct VpcHelper(String);

impl handlebars::HelperDef for VpcHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        _h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        out.write(&self.0)?;
        Ok(())
    }
}

struct SubnetsHelper(Vec<String>);

impl handlebars::HelperDef for SubnetsHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let separator = h.param(0).and_then(|p| p.value().as_str()).unwrap_or(",");
        out.write(&self.0.join(separator))?;
        Ok(())
    }
}

/// `{{filter list key value}}` — returns the first element of `list` (an
/// array of objects) whose `key` field equals `value`.
struct FilterHelper;

impl handlebars::HelperDef for FilterHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let list = h
            .param(0)
            .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("filter", 0))?
            .value();
        let key = h
            .param(1)
            .and_then(|p| p.value().as_str())
            .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("filter", 1))?;
        let value = h
            .param(2)
            .and_then(|p| p.value().as_str())
            .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("filter", 2))?;

        let found = list
            .as_array()
            .and_then(|items| items.iter().find(|item| item.get(key).and_then(|v| v.as_str()) == Some(value)));

        if let Some(item) = found {
            out.write(&item.to_string())?;
        }

        Ok(())
    }
}
