//! Change publisher: GitHub REST API client for branch,
//! file-content, and pull-request operations. Everything goes through the
//! REST API's git-data and contents endpoints, base64-mediated, rather than
//! shelling out to `git`/`gh`.

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct RefObject {
    object: RefObjectInner,
}

#[derive(Debug, Deserialize)]
struct RefObjectInner {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
}

/// Thin wrapper over the GitHub REST API for the manifest store.
pub struct GitHubPublisher {
    owner: String,
    repo: String,
    token: String,
    client: reqwest::Client,
}

impl GitHubPublisher {
    pub fn new(repository: &str, token: String) -> Result<Self> {
        let mut parts = repository.splitn(2, '/');
        let owner = parts.next().unwrap_or_default().to_string();
        let repo = parts.next().unwrap_or_default().to_string();
        if owner.is_empty() || repo.is_empty() {
            bail!("GITHUB_REPOSITORY must be \"owner/repo\", got {:?}", repository);
        }
        let client = reqwest::Client::builder().timeout(std::time::Duration::from_secs(60)).build()?;
        Ok(Self { owner, repo, token, client })
    }

    fn api(&self, path: &str) -> String {
        format!("https://api.github.com/repos/{}/{}{}", self.owner, self.repo, path)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.token)
            .header("User-Agent", "resource-advisor")
            .header("Accept", "application/vnd.github+json")
    }

    async fn ref_sha(&self, branch: &str) -> Result<Option<String>> {
        let url = self.api(&format!("/git/ref/heads/{}", branch));
        let resp = self.auth(self.client.get(&url)).send().await.context("fetching ref")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("unexpected status fetching ref {}: {}", branch, resp.status());
        }
        let parsed: RefObject = resp.json().await.context("parsing ref response")?;
        Ok(Some(parsed.object.sha))
    }

    /// Ensures `head` exists and points at the current `base` SHA: resets it
    /// if present and different, creates it fresh if absent. Each run begins
    /// from the current base.
    pub async fn ensure_branch(&self, base: &str, head: &str) -> Result<()> {
        let base_sha = self.ref_sha(base).await?.with_context(|| format!("base branch {} not found", base))?;
        match self.ref_sha(head).await? {
            Some(head_sha) if head_sha == base_sha => {}
            Some(_) => {
                let url = self.api(&format!("/git/refs/heads/{}", head));
                let resp = self
                    .auth(self.client.patch(&url))
                    .json(&json!({ "sha": base_sha, "force": true }))
                    .send()
                    .await
                    .context("resetting head branch")?;
                if !resp.status().is_success() {
                    bail!("failed to reset branch {}: {}", head, resp.status());
                }
            }
            None => {
                let url = self.api("/git/refs");
                let resp = self
                    .auth(self.client.post(&url))
                    .json(&json!({ "ref": format!("refs/heads/{}", head), "sha": base_sha }))
                    .send()
                    .await
                    .context("creating head branch")?;
                if !resp.status().is_success() {
                    bail!("failed to create branch {}: {}", head, resp.status());
                }
            }
        }
        Ok(())
    }

    /// Returns `(content, sha)` if the file exists on `branch`.
    pub async fn read_file(&self, branch: &str, path: &str) -> Result<Option<(String, String)>> {
        let url = self.api(&format!("/contents/{}", path));
        let resp = self.auth(self.client.get(&url).query(&[("ref", branch)])).send().await.context("reading file")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("unexpected status reading {}: {}", path, resp.status());
        }
        let parsed: ContentsResponse = resp.json().await.context("parsing contents response")?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(parsed.content.replace(['\n', '\r'], ""))
            .context("decoding base64 file content")?;
        let content = String::from_utf8(decoded).context("file content is not utf-8")?;
        Ok(Some((content, parsed.sha)))
    }

    /// Writes `content` to `path` on `branch`. Idempotent: no write when the
    /// existing content is byte-identical.
    pub async fn update_file(&self, branch: &str, path: &str, content: &str, message: &str) -> Result<bool> {
        let existing = self.read_file(branch, path).await?;
        if let Some((existing_content, _)) = &existing {
            if existing_content == content {
                return Ok(false);
            }
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
        let mut body = json!({
            "message": message,
            "content": encoded,
            "branch": branch,
        });
        if let Some((_, sha)) = existing {
            body["sha"] = json!(sha);
        }
        let url = self.api(&format!("/contents/{}", path));
        let resp = self.auth(self.client.put(&url)).json(&body).send().await.context("writing file")?;
        if !resp.status().is_success() {
            bail!("failed to write {}: {}", path, resp.status());
        }
        Ok(true)
    }

    async fn find_open_pull(&self, head: &str, base: &str) -> Result<Option<u64>> {
        let url = self.api("/pulls");
        let head_filter = format!("{}:{}", self.owner, head);
        let resp = self
            .auth(self.client.get(&url).query(&[("head", head_filter.as_str()), ("base", base), ("state", "open")]))
            .send()
            .await
            .context("listing pull requests")?;
        if !resp.status().is_success() {
            bail!("unexpected status listing pulls: {}", resp.status());
        }
        let pulls: Vec<PullRequest> = resp.json().await.context("parsing pulls response")?;
        Ok(pulls.into_iter().next().map(|p| p.number))
    }

    /// Looks up an open PR matching `head -> base`; updates title/body if
    /// found, else creates one.
    pub async fn ensure_pull_request(&self, head: &str, base: &str, title: &str, body: &str) -> Result<u64> {
        if let Some(number) = self.find_open_pull(head, base).await? {
            let url = self.api(&format!("/pulls/{}", number));
            let resp = self
                .auth(self.client.patch(&url))
                .json(&json!({ "title": title, "body": body }))
                .send()
                .await
                .context("updating pull request")?;
            if !resp.status().is_success() {
                bail!("failed to update PR #{}: {}", number, resp.status());
            }
            return Ok(number);
        }

        let url = self.api("/pulls");
        let resp = self
            .auth(self.client.post(&url))
            .json(&json!({ "title": title, "head": head, "base": base, "body": body }))
            .send()
            .await
            .context("creating pull request")?;
        if !resp.status().is_success() {
            bail!("failed to create PR: {}", resp.status());
        }
        let created: PullRequest = resp.json().await.context("parsing created PR response")?;
        Ok(created.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_repository() {
        assert!(GitHubPublisher::new("not-a-repo", "tok".to_string()).is_err());
    }

    #[test]
    fn accepts_owner_slash_repo() {
        assert!(GitHubPublisher::new("acme/infra", "tok".to_string()).is_ok());
    }
}
